//! Tree pane: selection reconciliation, scrolling and keyboard handling.
//!
//! The selection is either line-driven (`cur_line` set, `cur_node` unknown)
//! or node-driven (`cur_node` set, `cur_line` unknown). Each redraw walks the
//! visible tree once and fills in whichever half is missing.

use crate::console::{Color, Console, Key};
use crate::dialog;
use crate::error::{Result, VisError};
use crate::hex_viewer::{HexExit, HexViewer, Region, LINE_WIDTH};
use crate::node::{ExplorePolicy, Forest, NodeId};
use crate::value::{Buffer, Span, Value};
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, trace};

/// Lines moved by PgUp/PgDn.
pub const PAGE_LINES: usize = 20;

/// Ancestor levels highlighted in the hex pane.
pub const HIGHLIGHT_LEVELS: usize = 4;

pub struct Tree<C: Console> {
    ui: C,
    forest: Forest,
    hv: HexViewer,
    hv_hidden: bool,
    cur_io: Option<Buffer>,

    cur_line: Option<usize>,
    cur_node: Option<NodeId>,
    cur_shift: usize,
    max_scr_ln: usize,
    do_exit: bool,

    // Running line counter of the current draw pass.
    ln: usize,
}

impl<C: Console> Tree<C> {
    pub fn new(ui: C, root: Value, policy: ExplorePolicy) -> Self {
        let hv = HexViewer::embedded(&ui);
        let mut tree = Self {
            ui,
            forest: Forest::new(root, policy),
            hv,
            hv_hidden: false,
            cur_io: None,
            cur_line: Some(0),
            cur_node: None,
            cur_shift: 0,
            max_scr_ln: 0,
            do_exit: false,
            ln: 0,
        };
        tree.recalc_sizes();
        tree
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn hex(&self) -> &HexViewer {
        &self.hv
    }

    pub fn console(&self) -> &C {
        &self.ui
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.ui
    }

    pub fn into_console(self) -> C {
        self.ui
    }

    pub fn selected_line(&self) -> Option<usize> {
        self.cur_line
    }

    pub fn selected_node(&self) -> Option<NodeId> {
        self.cur_node
    }

    pub fn scroll_offset(&self) -> usize {
        self.cur_shift
    }

    /// Index of the last screen line the tree may use.
    pub fn viewport_height(&self) -> usize {
        self.max_scr_ln
    }

    pub fn exit_requested(&self) -> bool {
        self.do_exit
    }

    pub fn is_hex_hidden(&self) -> bool {
        self.hv_hidden
    }

    pub fn tree_width(&self) -> usize {
        if self.hv_hidden {
            self.ui.cols()
        } else {
            self.hv.shift_x()
        }
    }

    pub fn recalc_sizes(&mut self) {
        let (rows, cols) = self.ui.size();
        self.max_scr_ln = rows.saturating_sub(3);
        self.hv.recalc_sizes(&self.ui);
        self.hv.set_shift_x(cols.saturating_sub(LINE_WIDTH + 1));
    }

    /// Handles a resize notification. Geometry is always refreshed; the
    /// screen is only repainted when `immediate`.
    pub fn on_resize(&mut self, immediate: bool) -> Result<()> {
        self.recalc_sizes();
        if immediate {
            self.refresh()?;
        }
        Ok(())
    }

    fn select_line(&mut self, line: usize) {
        self.cur_line = Some(line);
        self.cur_node = None;
    }

    fn select_node(&mut self, id: NodeId) {
        self.cur_node = Some(id);
        self.cur_line = None;
    }

    fn resolved(&self) -> bool {
        self.cur_line.is_some() && self.cur_node.is_some()
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            if let Some(immediate) = self.ui.take_resize() {
                self.on_resize(immediate)?;
            }
            self.refresh()?;

            let Some(key) = self.ui.read_key()? else { continue };
            if let Err(e) = self.handle_key(key) {
                if !e.is_recoverable() {
                    return Err(e);
                }
                let header = match e {
                    VisError::Parse(_) => "Error while parsing",
                    _ => "Error",
                };
                dialog::message_box(&mut self.ui, header, &e.to_string())?;
            }

            if self.do_exit {
                return Ok(());
            }
        }
    }

    /// Redraws both panes and the status line.
    pub fn refresh(&mut self) -> Result<()> {
        let t0 = Instant::now();
        self.redraw()?;
        let t_tree = t0.elapsed();
        if !self.hv_hidden {
            self.update_hex()?;
        }
        self.draw_status()?;
        trace!(
            tree_us = t_tree.as_micros() as u64,
            total_us = t0.elapsed().as_micros() as u64,
            lines = self.ln,
            "frame"
        );
        Ok(())
    }

    /// Draws the tree pane, resolving the selection and keeping it on screen.
    pub fn redraw(&mut self) -> Result<()> {
        self.draw_pass()?;

        if !self.resolved() {
            // Selection went past the end of the visible tree.
            let last = self.forest.height(self.forest.root()) - 1;
            self.select_line(last);
            self.draw_pass()?;
        }

        let line = self.cur_line.unwrap_or(0);
        let clamped = self.cur_shift.max(line.saturating_sub(self.max_scr_ln)).min(line);
        if clamped != self.cur_shift {
            self.cur_shift = clamped;
            self.draw_pass()?;
        }
        Ok(())
    }

    fn draw_pass(&mut self) -> Result<()> {
        self.ui.clear()?;
        self.ln = 0;
        let root = self.forest.root();
        self.draw_rec(root)
    }

    fn draw_rec(&mut self, id: NodeId) -> Result<()> {
        let max = self.max_scr_ln as isize;
        let scr_ln = self.ln as isize - self.cur_shift as isize;
        if self.resolved() && scr_ln > max {
            return Ok(());
        }

        if self.cur_node.is_none() && self.cur_line == Some(self.ln) {
            self.cur_node = Some(id);
        } else if self.cur_line.is_none() && self.cur_node == Some(id) {
            self.cur_line = Some(self.ln);
        }
        let selected = self.cur_node == Some(id);

        if scr_ln >= 0 && scr_ln <= max {
            let width = self.tree_width().saturating_sub(1);
            let text = self.forest.node(id).line(width);
            self.ui.goto(0, scr_ln as usize)?;
            if selected {
                self.ui.set_bg(Color::WHITE)?;
                self.ui.set_fg(Color::BLACK)?;
            }
            self.ui.print(&text)?;
            if selected {
                self.ui.reset_colors()?;
            }
        }
        self.ln += 1;

        if !self.forest.node(id).is_open() {
            return Ok(());
        }
        let n = self.forest.node(id).children().len();
        for i in 0..n {
            let ch = self.forest.node(id).children()[i];
            self.draw_rec(ch)?;
            if self.resolved() && self.ln as isize - self.cur_shift as isize > max {
                break;
            }
        }
        Ok(())
    }

    fn draw_status(&mut self) -> Result<()> {
        let Some(cur) = self.cur_node else { return Ok(()) };
        let range = match self.forest.node(cur).span() {
            Some(Span { start, end: Some(end) }) => format!("[{start:#x}..{end:#x})"),
            Some(Span { start, end: None }) => format!("[{start:#x}..?)"),
            None => "(no position)".to_string(),
        };
        let mut line = format!("{}  {}", self.forest.path(cur), range);
        let width = self.tree_width().saturating_sub(1);
        if line.chars().count() > width {
            line = line.chars().take(width).collect();
        }
        self.ui.goto(0, self.max_scr_ln + 1)?;
        self.ui.reset_colors()?;
        self.ui.print(&line)
    }

    fn update_hex(&mut self) -> Result<()> {
        let Some(cur) = self.cur_node else { return Ok(()) };

        if let Some(io) = self.forest.io(cur) {
            let same = self.cur_io.as_ref().map_or(false, |c| Rc::ptr_eq(c, &io));
            if !same {
                debug!(bytes = io.len(), "hex pane switched buffer");
                self.hv.set_buf(io.clone());
                self.cur_io = Some(io);
            }
        }

        if let Some(span) = self.forest.node(cur).span() {
            if !span.contains(self.hv.addr()) {
                self.hv.set_addr(span.start);
                self.hv.ensure_visible(&mut self.ui)?;
            }
        }

        self.hv.redraw(&mut self.ui)?;
        let regions = self.highlight_regions(HIGHLIGHT_LEVELS);
        self.hv.highlight(&mut self.ui, regions)
    }

    /// Byte ranges of the selection and up to `max_levels - 1` ancestors,
    /// innermost first. Ranges without an end, or living in a different
    /// buffer than the selection, are left out.
    pub fn highlight_regions(&self, max_levels: usize) -> Vec<Region> {
        let mut out = Vec::new();
        let Some(cur) = self.cur_node else { return out };
        let io = self.forest.io(cur);

        let mut node = Some(cur);
        for rank in 0..max_levels {
            let Some(id) = node else { break };
            let n = self.forest.node(id);
            let same_io = match (&io, self.forest.io(id)) {
                (Some(a), Some(b)) => Rc::ptr_eq(a, &b),
                _ => false,
            };
            if let Some(Span { start, end: Some(end) }) = n.span() {
                if same_io {
                    out.push(Region { start, end, rank });
                }
            }
            node = n.parent();
        }
        out
    }

    /// Applies one keystroke to the tree state.
    pub fn handle_key(&mut self, key: Key) -> Result<()> {
        if !self.resolved() {
            self.redraw()?;
        }
        let res = self.apply_key(key);

        // Keys that did not move the selection, or failed half way, keep it
        // anchored to the node.
        if self.resolved() {
            self.cur_line = None;
        }
        res
    }

    fn apply_key(&mut self, key: Key) -> Result<()> {
        let cur = self.cur_node.unwrap_or(self.forest.root());
        let line = self.cur_line.unwrap_or(0);

        match key {
            Key::Up => self.select_line(line.saturating_sub(1)),
            Key::Down => self.select_line(line + 1),
            Key::Left => {
                if self.forest.node(cur).is_open() {
                    self.forest.close(cur);
                    self.select_node(cur);
                } else if let Some(parent) = self.forest.node(cur).parent() {
                    self.select_node(parent);
                }
            }
            Key::Right => {
                let n = self.forest.node(cur);
                if n.is_open() {
                    self.select_line(line + 1);
                } else if n.is_expandable() {
                    self.forest.open(cur)?;
                    self.select_node(cur);
                }
            }
            Key::Home => {
                self.select_line(0);
                self.cur_shift = 0;
            }
            Key::End => {
                let last = self.forest.height(self.forest.root()) - 1;
                self.select_line(last);
            }
            Key::PgUp => self.select_line(line.saturating_sub(PAGE_LINES)),
            Key::PgDn => self.select_line(line + PAGE_LINES),
            Key::Enter => {
                if let Some(Value::Bytes(b)) = self.forest.node(cur).value() {
                    let buf = b.clone();
                    self.view_bytes(buf)?;
                } else {
                    self.forest.toggle(cur)?;
                }
                self.select_node(cur);
            }
            Key::Tab => {
                if !self.hv_hidden {
                    self.focus_hex()?;
                }
            }
            Key::Char('H') => {
                self.hv_hidden = !self.hv_hidden;
                self.ui.clear()?;
            }
            Key::Char('q') => self.do_exit = true,
            _ => {}
        }
        Ok(())
    }

    /// Hands input to the companion pane until it yields or quits.
    fn focus_hex(&mut self) -> Result<()> {
        loop {
            match self.hv.run(&mut self.ui)? {
                HexExit::Yield => return Ok(()),
                HexExit::Quit => {
                    self.do_exit = true;
                    return Ok(());
                }
                HexExit::Resized(immediate) => self.on_resize(immediate)?,
            }
        }
    }

    /// Runs a full-screen hex viewer over `buf` until it quits.
    fn view_bytes(&mut self, buf: Buffer) -> Result<()> {
        self.ui.clear()?;
        let mut hv = HexViewer::standalone(&self.ui, buf);
        hv.redraw(&mut self.ui)?;
        let res = hv.run(&mut self.ui);
        // The viewer took any resize that arrived while it was up.
        self.recalc_sizes();
        res?;
        self.ui.clear()
    }
}
