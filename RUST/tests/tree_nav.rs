use ksv::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ROWS: usize = 24;
const COLS: usize = 120;

fn foo_bar() -> Value {
    let ty = RecordType::new("foo_bar").seq(&["foo", "bar"]).build();
    let mut io = Stream::from_vec(vec![0x01, b'h', b'e', b'l', b'l', b'o', b'!']);
    let mut b = RecordBuilder::new(&ty, &io);
    b.read("foo", &mut io, |io| Ok(Value::UInt(io.read_u1()? as u64))).unwrap();
    b.read("bar", &mut io, |io| Ok(Value::Bytes(io.read_bytes(6)?))).unwrap();
    Value::Struct(b.finish())
}

/// `len` (u1), `items` (len bytes), `nested` { a: u2le, b: u2le },
/// optionally followed by a computed `broken` field that always fails.
fn catalog(n: u8, broken: bool) -> Value {
    let mut root_ty = RecordType::new("catalog").seq(&["len", "items", "nested"]);
    if broken {
        root_ty = root_ty.instance("broken", |_r, io| {
            io.seek(0)?;
            io.read_bytes(1_000)?;
            Ok(Value::Bool(false))
        });
    }
    let root_ty = root_ty.build();
    let nested_ty = RecordType::new("nested").seq(&["a", "b"]).build();

    let mut data = vec![n];
    data.extend(0..n);
    data.extend([0x10, 0x00, 0x20, 0x00]);
    let mut io = Stream::from_vec(data);
    let mut b = RecordBuilder::new(&root_ty, &io);
    b.read("len", &mut io, |io| Ok(Value::UInt(io.read_u1()? as u64))).unwrap();
    b.read_array("items", &mut io, n as usize, |io, _| Ok(Value::UInt(io.read_u1()? as u64)))
        .unwrap();
    b.read_struct("nested", &mut io, &nested_ty, |nb, io| {
        nb.read("a", io, |io| Ok(Value::UInt(io.read_u2le()? as u64)))?;
        nb.read("b", io, |io| Ok(Value::UInt(io.read_u2le()? as u64)))
    })
    .unwrap();
    Value::Struct(b.finish())
}

fn tree_of(root: Value) -> Tree<VirtualConsole> {
    let mut tree = Tree::new(VirtualConsole::new(ROWS, COLS), root, ExplorePolicy::Retry);
    tree.refresh().unwrap();
    tree
}

fn press(tree: &mut Tree<VirtualConsole>, keys: &[Key]) {
    for &k in keys {
        tree.handle_key(k).unwrap();
        tree.refresh().unwrap();
    }
}

fn selected_label(tree: &Tree<VirtualConsole>) -> String {
    let id = tree.selected_node().unwrap();
    tree.forest().node(id).label().to_string()
}

#[test]
fn selecting_bar_highlights_its_bytes() {
    let mut tree = tree_of(foo_bar());
    press(&mut tree, &[Key::Right, Key::Down, Key::Down]);
    assert_eq!(selected_label(&tree), "bar");
    assert_eq!(tree.selected_line(), Some(2));
    assert_eq!(tree.highlight_regions(HIGHLIGHT_LEVELS), vec![Region { start: 1, end: 7, rank: 0 }]);
    assert_eq!(tree.hex().addr(), 1);

    let x0 = tree.tree_width();
    assert_eq!(x0, COLS - LINE_WIDTH - 1);
    let ui = tree.console();
    for col in 0..8 {
        let expected = if (1..7).contains(&col) { Some(Color::WHITE) } else { None };
        assert_eq!(ui.bg_at(x0 + 10 + 3 * col, 0), expected, "hex column {col}");
        assert_eq!(ui.bg_at(x0 + 12 + 3 * PER_LINE + col, 0), expected, "char column {col}");
    }
    assert!(ui.row_text(0).contains("00000000: 01 68 65 6c 6c 6f 21"));
    assert!(ui.row_text(0).contains("| .hello!"));
}

#[test]
fn selection_is_one_sided_before_redraw_and_visible_after() {
    let keys = [
        Key::Up,
        Key::Down,
        Key::Left,
        Key::Right,
        Key::Home,
        Key::End,
        Key::PgUp,
        Key::PgDn,
    ];
    let mut rng = StdRng::seed_from_u64(0x6b7376);
    let mut tree = tree_of(catalog(60, false));

    for _ in 0..500 {
        let k = keys[rng.gen_range(0..keys.len())];
        tree.handle_key(k).unwrap();
        assert!(
            tree.selected_line().is_some() != tree.selected_node().is_some(),
            "after {k:?}: line {:?} node {:?}",
            tree.selected_line(),
            tree.selected_node()
        );

        tree.refresh().unwrap();
        let line = tree.selected_line().unwrap();
        assert!(tree.selected_node().is_some());
        let top = tree.scroll_offset();
        assert!(line >= top && line <= top + tree.viewport_height(), "line {line} top {top}");
        assert!(line < tree.forest().height(tree.forest().root()));
    }
}

#[test]
fn open_then_close_restores_numbering() {
    let mut tree = tree_of(catalog(30, false));
    press(&mut tree, &[Key::Right, Key::Down, Key::Down]);
    assert_eq!(selected_label(&tree), "items");
    let before = tree.console().text();
    let height = tree.forest().height(tree.forest().root());

    press(&mut tree, &[Key::Right]);
    assert_eq!(tree.forest().height(tree.forest().root()), height + 30);
    press(&mut tree, &[Key::Left]);

    assert_eq!(selected_label(&tree), "items");
    assert_eq!(tree.forest().height(tree.forest().root()), height);
    assert_eq!(tree.console().text(), before);
}

#[test]
fn paging_scrolls_and_clamps_to_last_line() {
    let mut tree = tree_of(catalog(60, true));
    press(&mut tree, &[Key::Right, Key::Down, Key::Down, Key::Right]);
    let last = tree.forest().height(tree.forest().root()) - 1;

    press(&mut tree, &[Key::PgDn]);
    assert_eq!(tree.selected_line(), Some(22));
    assert_eq!(tree.scroll_offset(), 22 - tree.viewport_height());

    for _ in 0..5 {
        press(&mut tree, &[Key::PgDn]);
    }
    assert_eq!(tree.selected_line(), Some(last));
    assert_eq!(selected_label(&tree), "broken");

    press(&mut tree, &[Key::Home]);
    assert_eq!(tree.selected_line(), Some(0));
    assert_eq!(tree.scroll_offset(), 0);

    press(&mut tree, &[Key::End]);
    assert_eq!(tree.selected_line(), Some(last));
    press(&mut tree, &[Key::Up]);
    assert_eq!(tree.selected_line(), Some(last - 1));
}

#[test]
fn left_selects_parent_and_is_a_no_op_at_root() {
    let mut tree = tree_of(catalog(4, true));
    press(&mut tree, &[Key::Right, Key::End, Key::Up, Key::Right, Key::Right, Key::Down]);
    assert_eq!(selected_label(&tree), "b");
    assert_eq!(tree.forest().path(tree.selected_node().unwrap()), "nested.b");

    press(&mut tree, &[Key::Left]);
    assert_eq!(selected_label(&tree), "nested");
    press(&mut tree, &[Key::Left]);
    assert_eq!(selected_label(&tree), "nested");
    assert!(!tree.forest().node(tree.selected_node().unwrap()).is_open());

    press(&mut tree, &[Key::Left, Key::Left]);
    assert_eq!(tree.selected_node(), Some(tree.forest().root()));
    assert!(!tree.forest().node(tree.forest().root()).is_open());
    press(&mut tree, &[Key::Left]);
    assert_eq!(tree.selected_node(), Some(tree.forest().root()));
}

#[test]
fn q_in_byte_view_only_leaves_the_byte_view() {
    let mut tree = tree_of(foo_bar());
    press(&mut tree, &[Key::Right, Key::Down, Key::Down]);
    let shift = tree.scroll_offset();

    tree.console_mut().push_keys([Key::Down, Key::Char('q')]);
    tree.handle_key(Key::Enter).unwrap();
    assert_eq!(tree.console().pending_keys(), 0);
    assert!(!tree.exit_requested());
    tree.refresh().unwrap();
    assert_eq!(selected_label(&tree), "bar");
    assert_eq!(tree.scroll_offset(), shift);

    tree.handle_key(Key::Char('q')).unwrap();
    assert!(tree.exit_requested());
}

#[test]
fn run_loop_unwinds_byte_view_before_exiting() {
    let ui = VirtualConsole::new(ROWS, COLS).with_keys([
        Key::Right,
        Key::Down,
        Key::Down,
        Key::Enter,
        Key::Char('q'),
        Key::Char('q'),
    ]);
    let mut tree = Tree::new(ui, foo_bar(), ExplorePolicy::Retry);
    tree.run().unwrap();
    assert!(tree.exit_requested());
    assert_eq!(tree.console().pending_keys(), 0);
    assert_eq!(selected_label(&tree), "bar");
}

#[test]
fn parse_error_on_first_visit_shows_modal() {
    let ui = VirtualConsole::new(ROWS, COLS).with_keys([Key::Right, Key::End, Key::Right]);
    let mut tree = Tree::new(ui, catalog(4, true), ExplorePolicy::Retry);

    // The script runs out while the modal waits for Enter.
    let err = tree.run().unwrap_err();
    assert!(matches!(err, VisError::Io(_)));
    let screen = tree.console().text();
    assert!(screen.contains("Error while parsing"));
    assert!(screen.contains("end of stream: requested 1000 bytes at offset 0"));
    assert!(screen.contains("[ OK ]"));

    let broken = tree.selected_node().unwrap();
    assert_eq!(tree.forest().node(broken).label(), "broken");
    assert!(tree.forest().node(broken).value().is_none());
    assert!(!tree.forest().node(broken).is_open());
}

#[test]
fn failed_key_keeps_selection_anchored_to_node() {
    let mut tree = tree_of(catalog(4, true));
    press(&mut tree, &[Key::Right, Key::End]);
    assert_eq!(selected_label(&tree), "broken");

    for key in [Key::Right, Key::Enter] {
        let err = tree.handle_key(key).unwrap_err();
        assert!(matches!(err, VisError::Parse(ParseError::Eof { .. })));
        assert_eq!(tree.selected_line(), None);
        assert_eq!(selected_label(&tree), "broken");
        tree.refresh().unwrap();
    }
}

#[test]
fn browsing_continues_after_parse_error_modal() {
    let ui = VirtualConsole::new(ROWS, COLS).with_keys([
        Key::Right,
        Key::End,
        Key::Right,
        Key::Char('x'),
        Key::Enter,
        Key::Up,
        Key::Char('q'),
    ]);
    let mut tree = Tree::new(ui, catalog(4, true), ExplorePolicy::Retry);
    tree.run().unwrap();
    assert_eq!(tree.console().pending_keys(), 0);
    assert_eq!(selected_label(&tree), "nested");

    let root = tree.forest().root();
    let broken = tree.forest().child(root, "broken").unwrap();
    assert!(tree.forest().node(broken).is_expandable());
    assert!(!tree.forest().node(broken).is_explored());
}

#[test]
fn substream_nodes_switch_the_hex_pane_buffer() {
    let root_ty = RecordType::new("framed").seq(&["size", "body"]).build();
    let body_ty = RecordType::new("body").seq(&["tag", "rest"]).build();
    let mut io = Stream::from_vec(vec![4, b'T', 9, 9, 9, 0xff]);
    let mut b = RecordBuilder::new(&root_ty, &io);
    b.read("size", &mut io, |io| Ok(Value::UInt(io.read_u1()? as u64))).unwrap();
    b.read_substruct("body", &mut io, 4, &body_ty, |bb, sub| {
        bb.read("tag", sub, |s| Ok(Value::UInt(s.read_u1()? as u64)))?;
        bb.read("rest", sub, |s| Ok(Value::Bytes(s.read_bytes_full()?)))
    })
    .unwrap();
    let root = Value::Struct(b.finish());

    let mut tree = tree_of(root);
    assert_eq!(tree.hex().buf().len(), 6);

    press(&mut tree, &[Key::Right, Key::End]);
    assert_eq!(selected_label(&tree), "body");
    assert_eq!(tree.hex().buf().len(), 6);
    assert_eq!(tree.highlight_regions(HIGHLIGHT_LEVELS), vec![Region { start: 1, end: 5, rank: 0 }]);

    press(&mut tree, &[Key::Right, Key::End]);
    assert_eq!(selected_label(&tree), "rest");
    assert_eq!(tree.hex().buf().len(), 4);
    assert_eq!(tree.hex().addr(), 1);
    // `body` lives in the outer buffer, so only `rest` is highlighted.
    assert_eq!(tree.highlight_regions(HIGHLIGHT_LEVELS), vec![Region { start: 1, end: 4, rank: 0 }]);

    let status = tree.console().row_text(tree.viewport_height() + 1);
    assert!(status.starts_with("body.rest  [0x1..0x4)"), "{status}");
}

#[test]
fn ancestors_get_dimmer_highlights() {
    let mut tree = tree_of(catalog(4, true));
    press(&mut tree, &[Key::Right, Key::Down, Key::Down, Key::Right, Key::Down, Key::Down]);
    assert_eq!(selected_label(&tree), "1");
    assert_eq!(
        tree.highlight_regions(HIGHLIGHT_LEVELS),
        vec![Region { start: 2, end: 3, rank: 0 }, Region { start: 1, end: 5, rank: 1 }]
    );

    let x0 = tree.tree_width();
    let ui = tree.console();
    assert_eq!(ui.bg_at(x0 + 10 + 3 * 2, 0), Some(Color::WHITE));
    assert_eq!(ui.bg_at(x0 + 10 + 3 * 1, 0), Some(Color::named("gray20").unwrap()));
    assert_eq!(ui.bg_at(x0 + 10 + 3 * 5, 0), None);
}

#[test]
fn hide_toggle_widens_tree_and_ignores_tab() {
    let mut tree = tree_of(foo_bar());
    assert!(!tree.is_hex_hidden());
    press(&mut tree, &[Key::Char('H')]);
    assert!(tree.is_hex_hidden());
    assert_eq!(tree.tree_width(), COLS);
    assert!(!tree.console().text().contains("00000000:"));

    // Tab with the pane hidden reads nothing from the (empty) script.
    tree.handle_key(Key::Tab).unwrap();

    press(&mut tree, &[Key::Char('H')]);
    assert!(tree.console().text().contains("00000000:"));
}

#[test]
fn tab_hands_keys_to_companion_pane() {
    let mut tree = tree_of(foo_bar());
    tree.console_mut().push_keys([Key::Right, Key::Right, Key::Tab]);
    tree.handle_key(Key::Tab).unwrap();
    assert_eq!(tree.hex().addr(), 2);
    assert!(!tree.exit_requested());

    tree.console_mut().push_keys([Key::Char('q')]);
    tree.handle_key(Key::Tab).unwrap();
    assert!(tree.exit_requested());
}

#[test]
fn resize_recomputes_geometry() {
    let mut tree = tree_of(foo_bar());
    tree.console_mut().resize(30, 100, false);
    tree.console_mut().push_keys([Key::Char('q')]);
    tree.run().unwrap();
    assert_eq!(tree.viewport_height(), 27);
    assert_eq!(tree.tree_width(), 100 - LINE_WIDTH - 1);
    assert_eq!(tree.hex().shift_x(), 100 - LINE_WIDTH - 1);

    tree.console_mut().resize(12, 100, true);
    tree.on_resize(true).unwrap();
    assert_eq!(tree.viewport_height(), 9);
    assert!(tree.console().row_text(0).starts_with("[+] [root]"));
}

#[test]
fn resize_during_byte_view_reaches_the_tree() {
    let mut tree = tree_of(foo_bar());
    press(&mut tree, &[Key::Right, Key::Down, Key::Down]);

    tree.console_mut().resize(12, 100, true);
    tree.console_mut().push_keys([Key::Char('q')]);
    tree.handle_key(Key::Enter).unwrap();
    assert_eq!(tree.console().pending_keys(), 0);
    tree.refresh().unwrap();

    assert_eq!(tree.viewport_height(), 9);
    assert_eq!(tree.hex().shift_x(), 100 - LINE_WIDTH - 1);
    assert_eq!(tree.tree_width(), 100 - LINE_WIDTH - 1);
    assert!(tree.console().row_text(0).starts_with("[-] [root]"));
    assert_eq!(selected_label(&tree), "bar");
}

#[test]
fn resize_while_companion_pane_has_focus_relays_out_both_panes() {
    let mut tree = tree_of(foo_bar());
    press(&mut tree, &[Key::Right]);

    tree.console_mut().resize(12, 100, true);
    tree.console_mut().push_keys([Key::Right, Key::Tab]);
    tree.handle_key(Key::Tab).unwrap();
    assert_eq!(tree.console().pending_keys(), 0);
    assert!(!tree.exit_requested());

    assert_eq!(tree.viewport_height(), 9);
    assert_eq!(tree.hex().shift_x(), 100 - LINE_WIDTH - 1);
    assert_eq!(tree.hex().addr(), 1);
    let ui = tree.console();
    assert!(ui.row_text(0).starts_with("[-] [root]"));
    assert!(ui.row_text(0).contains("00000000: 01 68"));
}
