mod console;
mod dialog;
mod dump;
mod error;
mod format;
mod gbf;
mod header;
mod hex_viewer;
mod node;
mod stream;
mod tree;
mod value;

pub use crate::console::{
    platform_console, Color, Console, CrosstermConsole, Key, PendingResize, VirtualConsole, HIGHLIGHT_COLORS,
};
pub use crate::dialog::{draw_rectangle, input_str, message_box};
pub use crate::dump::{hex_upper, to_json};
pub use crate::error::{CompileError, CompileErrors, ParseError, Result, VisError};
pub use crate::format::{read_input, Decoded, Format, FormatRegistry, RawFormat};
pub use crate::gbf::GbfFormat;
pub use crate::header::{
    compute_crc32, compute_header_crc32_hex, header_crc_ok, header_json_with_placeholder_crc, parse_header, FieldMeta,
    Header, MAGIC_BYTES, PREAMBLE_LEN,
};
pub use crate::hex_viewer::{
    addr_to_col, addr_to_row, byte_to_display_char, row_col_to_addr, HexExit, HexViewer, Region, LINE_WIDTH,
    PAGE_ROWS, PER_LINE,
};
pub use crate::node::{ExplorePolicy, Forest, Kind, Node, NodeId, Origin};
pub use crate::stream::Stream;
pub use crate::tree::{Tree, HIGHLIGHT_LEVELS, PAGE_LINES};
pub use crate::value::{Buffer, Composite, FieldDebug, InstanceFn, Record, RecordBuilder, RecordType, Span, Value};
