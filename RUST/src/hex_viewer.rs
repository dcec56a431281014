//! Address-based hex pane: address, hex and ASCII columns with a byte
//! cursor, its own vertical scroll and up to four highlighted ranges.

use crate::console::{Color, Console, Key, HIGHLIGHT_COLORS};
use crate::dialog;
use crate::error::{Result, VisError};
use crate::value::Buffer;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use tempfile::NamedTempFile;
use tracing::debug;

pub const PER_LINE: usize = 16;
pub const PAGE_ROWS: usize = 20;

/// Width of one rendered row: `xxxxxxxx: ` + 16 × `xx ` + `| ` + 16 chars.
pub const LINE_WIDTH: usize = 12 + 4 * PER_LINE;

pub fn addr_to_row(addr: usize) -> usize {
    addr / PER_LINE
}

pub fn addr_to_col(addr: usize) -> usize {
    addr % PER_LINE
}

pub fn row_col_to_addr(row: usize, col: usize) -> usize {
    row * PER_LINE + col
}

pub fn byte_to_display_char(x: u8) -> char {
    if x < 0x20 || x >= 0x7f {
        '.'
    } else {
        x as char
    }
}

/// Highlighted range `[start, end)` drawn with palette entry `rank`
/// (0 = innermost).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub end: usize,
    pub rank: usize,
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexExit {
    /// Tab: give focus back to the tree.
    Yield,
    /// `q`.
    Quit,
    /// Embedded pane saw a resize; the owner re-lays out and resumes it.
    Resized(bool),
}

#[derive(Debug)]
pub struct HexViewer {
    buf: Buffer,
    addr: usize,
    scroll_y: usize,
    shift_x: usize,
    max_scr_ln: usize,
    embedded: bool,
    regions: Vec<Region>,
}

impl HexViewer {
    /// Companion pane of a tree; Tab yields back to it.
    pub fn embedded(ui: &dyn Console) -> Self {
        Self::new(ui, Rc::from(Vec::new()), true)
    }

    /// Full-screen viewer for a single byte buffer.
    pub fn standalone(ui: &dyn Console, buf: Buffer) -> Self {
        Self::new(ui, buf, false)
    }

    fn new(ui: &dyn Console, buf: Buffer, embedded: bool) -> Self {
        Self {
            buf,
            addr: 0,
            scroll_y: 0,
            shift_x: 0,
            max_scr_ln: ui.rows().saturating_sub(3),
            embedded,
            regions: Vec::new(),
        }
    }

    pub fn buf(&self) -> &Buffer {
        &self.buf
    }

    /// Replaces the buffer; cursor, scroll and highlights are reset.
    pub fn set_buf(&mut self, buf: Buffer) {
        self.buf = buf;
        self.addr = 0;
        self.scroll_y = 0;
        self.regions.clear();
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn set_addr(&mut self, addr: usize) {
        self.addr = addr;
        self.clamp_cursor();
    }

    pub fn cur_row(&self) -> usize {
        addr_to_row(self.addr)
    }

    pub fn cur_col(&self) -> usize {
        addr_to_col(self.addr)
    }

    pub fn scroll_y(&self) -> usize {
        self.scroll_y
    }

    pub fn shift_x(&self) -> usize {
        self.shift_x
    }

    pub fn set_shift_x(&mut self, x: usize) {
        self.shift_x = x;
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Re-reads the viewport height from the console.
    pub fn recalc_sizes(&mut self, ui: &dyn Console) {
        self.max_scr_ln = ui.rows().saturating_sub(3);
    }

    fn col_to_col_hex(&self, c: usize) -> usize {
        self.shift_x + 10 + 3 * c
    }

    fn col_to_col_char(&self, c: usize) -> usize {
        self.shift_x + 12 + 3 * PER_LINE + c
    }

    /// Screen row of buffer row `r`; negative when scrolled above the view.
    fn row_to_scr(&self, r: usize) -> isize {
        r as isize - self.scroll_y as isize
    }

    fn clamp_cursor(&mut self) {
        let last = self.buf.len().saturating_sub(1);
        if self.addr > last {
            self.addr = last;
        }
    }

    /// Applies one navigation key. Returns false for keys that are not
    /// cursor movement.
    pub fn move_cursor(&mut self, key: Key) -> bool {
        let len = self.buf.len();
        let col = self.cur_col();
        match key {
            Key::Left => {
                if self.addr > 0 {
                    self.addr -= 1;
                }
            }
            Key::Right => {
                if self.addr + 1 < len {
                    self.addr += 1;
                }
            }
            Key::Up => self.addr = self.addr.saturating_sub(PER_LINE),
            Key::Down => self.addr = self.addr.saturating_add(PER_LINE),
            Key::PgUp => self.addr = self.addr.saturating_sub(PER_LINE * PAGE_ROWS),
            Key::PgDn => self.addr = self.addr.saturating_add(PER_LINE * PAGE_ROWS),
            Key::Home => {
                if col == 0 {
                    self.addr = 0;
                } else {
                    self.addr -= col;
                }
            }
            Key::End => {
                if col == PER_LINE - 1 {
                    self.addr = len.saturating_sub(1);
                } else {
                    self.addr = self.addr - col + PER_LINE - 1;
                }
            }
            _ => return false,
        }
        self.clamp_cursor();
        true
    }

    /// Scrolls so the cursor row is visible; redraws and re-highlights when
    /// the scroll position changed.
    pub fn ensure_visible(&mut self, ui: &mut dyn Console) -> Result<bool> {
        let row = self.cur_row();
        let scr_y = self.row_to_scr(row);
        if scr_y < 0 {
            self.scroll_y = row;
        } else if scr_y as usize > self.max_scr_ln {
            self.scroll_y = row - self.max_scr_ln;
        } else {
            return Ok(false);
        }
        self.redraw(ui)?;
        self.highlight_show(ui)?;
        Ok(true)
    }

    /// Draws the visible rows without highlights.
    pub fn redraw(&self, ui: &mut dyn Console) -> Result<()> {
        ui.reset_colors()?;
        let mut i = row_col_to_addr(self.scroll_y, 0);
        for row in 0..=self.max_scr_ln {
            ui.goto(self.shift_x, row)?;
            if i >= self.buf.len() {
                ui.print(&" ".repeat(LINE_WIDTH))?;
                continue;
            }
            let line = &self.buf[i..(i + PER_LINE).min(self.buf.len())];
            let hex: Vec<String> = line.iter().map(|x| format!("{x:02x}")).collect();
            let chars: String = line.iter().map(|&x| byte_to_display_char(x)).collect();
            ui.print(&format!(
                "{:08x}: {:<w_hex$}| {:<w_chr$}",
                i,
                hex.join(" "),
                chars,
                w_hex = PER_LINE * 3,
                w_chr = PER_LINE
            ))?;
            i += PER_LINE;
        }
        Ok(())
    }

    /// Replaces the highlighted ranges, erasing the previous ones first.
    pub fn highlight(&mut self, ui: &mut dyn Console, regions: Vec<Region>) -> Result<()> {
        self.highlight_hide(ui)?;
        self.regions = regions;
        self.highlight_show(ui)
    }

    /// Redraws highlighted bytes in plain colours.
    pub fn highlight_hide(&self, ui: &mut dyn Console) -> Result<()> {
        ui.reset_colors()?;
        for r in self.regions.iter().rev() {
            self.highlight_draw(ui, r.start, r.end)?;
        }
        Ok(())
    }

    /// Draws highlighted bytes, outermost first so inner ranges win.
    pub fn highlight_show(&self, ui: &mut dyn Console) -> Result<()> {
        for r in self.regions.iter().rev() {
            let name = HIGHLIGHT_COLORS[r.rank.min(HIGHLIGHT_COLORS.len() - 1)];
            ui.set_bg_named(name)?;
            ui.set_fg(Color::BLACK)?;
            self.highlight_draw(ui, r.start, r.end)?;
        }
        ui.reset_colors()
    }

    fn highlight_draw(&self, ui: &mut dyn Console, p1: usize, p2: usize) -> Result<()> {
        let scr = self.row_to_scr(addr_to_row(p1));
        if scr > self.max_scr_ln as isize {
            return Ok(());
        }

        let (r, c, i) = if scr < 0 {
            let i = row_col_to_addr(self.scroll_y, 0);
            if i >= p2 {
                return Ok(());
            }
            (0, 0, i)
        } else {
            (scr as usize, addr_to_col(p1), p1)
        };

        self.highlight_draw_cells(ui, r, c, i, p2, true)?;
        self.highlight_draw_cells(ui, r, c, i, p2, false)
    }

    fn highlight_draw_cells(
        &self,
        ui: &mut dyn Console,
        mut r: usize,
        mut c: usize,
        mut i: usize,
        p2: usize,
        hex: bool,
    ) -> Result<()> {
        let col = |c: usize| if hex { self.col_to_col_hex(c) } else { self.col_to_col_char(c) };
        ui.goto(col(c), r)?;
        while i < p2 {
            let Some(&v) = self.buf.get(i) else {
                return Ok(());
            };
            if hex {
                ui.print(&format!("{v:02x} "))?;
            } else {
                ui.print(&byte_to_display_char(v).to_string())?;
            }
            c += 1;
            if c >= PER_LINE {
                c = 0;
                r += 1;
                if r > self.max_scr_ln {
                    return Ok(());
                }
                ui.goto(col(c), r)?;
            }
            i += 1;
        }
        Ok(())
    }

    fn draw_status(&self, ui: &mut dyn Console) -> Result<()> {
        ui.goto(self.shift_x, self.max_scr_ln + 1)?;
        ui.reset_colors()?;
        ui.print(&format!(
            "{:08x} ({}, {}){:width$}",
            self.addr,
            self.cur_col(),
            self.cur_row(),
            "",
            width = 16
        ))
    }

    /// Runs the viewer's own input loop until Tab (embedded only), `q`, or a
    /// resize while embedded.
    pub fn run(&mut self, ui: &mut dyn Console) -> Result<HexExit> {
        loop {
            if let Some(immediate) = ui.take_resize() {
                if self.embedded {
                    return Ok(HexExit::Resized(immediate));
                }
                self.recalc_sizes(ui);
                if immediate {
                    ui.clear()?;
                    self.redraw(ui)?;
                    self.highlight_show(ui)?;
                }
            }

            self.draw_status(ui)?;
            let scr_row = self.row_to_scr(self.cur_row()).max(0) as usize;
            ui.goto(self.col_to_col_char(self.cur_col()), scr_row)?;

            let Some(key) = ui.read_key()? else { continue };
            match key {
                Key::Tab if self.embedded => return Ok(HexExit::Yield),
                Key::Char('q') => return Ok(HexExit::Quit),
                Key::Char('w') => self.save_prompt(ui)?,
                k => {
                    self.move_cursor(k);
                }
            }
            self.ensure_visible(ui)?;
        }
    }

    fn save_prompt(&mut self, ui: &mut dyn Console) -> Result<()> {
        if let Some(path) = dialog::input_str(ui, "Write buffer to file", "Filename")? {
            if let Err(e) = self.save(Path::new(&path)) {
                if !e.is_recoverable() {
                    return Err(e);
                }
                dialog::message_box(ui, "Error while writing", &e.to_string())?;
            }
        }
        if !self.embedded {
            ui.clear()?;
        }
        self.redraw(ui)?;
        self.highlight_show(ui)
    }

    /// Writes the whole buffer verbatim to `path`, atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = path.to_string_lossy();
        if s.is_empty() || s.contains('\0') {
            return Err(VisError::InvalidPath(s.into_owned()));
        }
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.as_file_mut().write_all(&self.buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| VisError::Io(e.error))?;
        debug!(path = %path.display(), bytes = self.buf.len(), "buffer saved");
        Ok(())
    }
}
