//! Terminal capability surface used by the tree and hex panes.
//!
//! Two drivers are provided: `CrosstermConsole` for real terminals and
//! `VirtualConsole`, an in-memory screen with a scripted key queue.

use crate::error::{Result, VisError};
use once_cell::sync::Lazy;
use ratatui::buffer::Buffer as ScreenBuffer;
use ratatui::layout::Rect;
use ratatui::style::Color as CellColor;
use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Stdout, Write};
use std::rc::Rc;
use std::str::FromStr;

use crossterm::{
    cursor::MoveTo,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Tab,
    Enter,
    Up,
    Down,
    Left,
    Right,
    PgUp,
    PgDn,
    Home,
    End,
    Backspace,
}

impl FromStr for Key {
    type Err = VisError;

    /// Parses key names as used by key scripts: `up`, `pgdn`, `enter`, ...,
    /// or a single literal character.
    fn from_str(s: &str) -> Result<Self> {
        let key = match s {
            "tab" => Key::Tab,
            "enter" => Key::Enter,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "pgup" => Key::PgUp,
            "pgdn" => Key::PgDn,
            "home" => Key::Home,
            "end" => Key::End,
            "backspace" => Key::Backspace,
            "space" => Key::Char(' '),
            "comma" => Key::Char(','),
            other => {
                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => {
                        return Err(VisError::Io(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("unknown key name `{other}`"),
                        )))
                    }
                }
            }
        };
        Ok(key)
    }
}

/// Entry of the 256-colour palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u8);

static COLORS: Lazy<BTreeMap<String, u8>> = Lazy::new(|| {
    let mut m = BTreeMap::new();
    m.insert("black".to_string(), 0);
    m.insert("gray".to_string(), 7);
    m.insert("white".to_string(), 15);
    for i in 0..24u8 {
        m.insert(format!("gray{i}"), 232 + i);
    }
    m
});

impl Color {
    pub const BLACK: Color = Color(0);
    pub const GRAY: Color = Color(7);
    pub const WHITE: Color = Color(15);

    pub fn named(name: &str) -> Result<Color> {
        COLORS
            .get(name)
            .map(|&c| Color(c))
            .ok_or_else(|| VisError::InvalidColor(name.to_string()))
    }
}

impl FromStr for Color {
    type Err = VisError;

    fn from_str(s: &str) -> Result<Self> {
        Color::named(s)
    }
}

/// Highlight backgrounds, innermost (brightest) first.
pub const HIGHLIGHT_COLORS: [&str; 4] = ["white", "gray20", "gray16", "gray12"];

/// Resize notification waiting to be handled by the event loop.
///
/// Drivers call `notify`; loops call `take` once per iteration. `immediate`
/// means the loop may redraw right away; otherwise it only refreshes its
/// cached geometry.
#[derive(Debug, Clone, Default)]
pub struct PendingResize(Rc<Cell<Option<bool>>>);

impl PendingResize {
    pub fn notify(&self, immediate: bool) {
        let prev = self.0.get().unwrap_or(false);
        self.0.set(Some(prev || immediate));
    }

    pub fn take(&self) -> Option<bool> {
        self.0.take()
    }
}

pub trait Console {
    /// `(rows, cols)`.
    fn size(&self) -> (usize, usize);

    fn clear(&mut self) -> Result<()>;

    /// Moves the cursor to column `x`, row `y` (both 0-based).
    fn goto(&mut self, x: usize, y: usize) -> Result<()>;

    fn set_fg(&mut self, color: Color) -> Result<()>;

    fn set_bg(&mut self, color: Color) -> Result<()>;

    fn reset_colors(&mut self) -> Result<()>;

    fn print(&mut self, s: &str) -> Result<()>;

    /// Prints `s` and moves to the start of the next row.
    fn puts(&mut self, s: &str) -> Result<()>;

    /// Blocks for the next key. `Ok(None)` means the console woke up without
    /// a key (a resize); the caller should check `take_resize`.
    fn read_key(&mut self) -> Result<Option<Key>>;

    fn take_resize(&mut self) -> Option<bool>;

    fn set_fg_named(&mut self, name: &str) -> Result<()> {
        let c = Color::named(name)?;
        self.set_fg(c)
    }

    fn set_bg_named(&mut self, name: &str) -> Result<()> {
        let c = Color::named(name)?;
        self.set_bg(c)
    }

    fn rows(&self) -> usize {
        self.size().0
    }

    fn cols(&self) -> usize {
        self.size().1
    }
}

/// Real terminal driver. Raw mode and the alternate screen are entered on
/// creation and left on drop.
pub struct CrosstermConsole {
    out: Stdout,
    rows: usize,
    cols: usize,
    resize: PendingResize,
}

impl CrosstermConsole {
    pub fn open() -> Result<Self> {
        enable_raw_mode()?;
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen)?;
        let (cols, rows) = terminal::size()?;
        Ok(Self {
            out,
            rows: rows as usize,
            cols: cols as usize,
            resize: PendingResize::default(),
        })
    }

    fn map_key(code: KeyCode, modifiers: KeyModifiers) -> Option<Key> {
        let key = match code {
            KeyCode::Tab => Key::Tab,
            KeyCode::Enter => Key::Enter,
            KeyCode::Up => Key::Up,
            KeyCode::Down => Key::Down,
            KeyCode::Left => Key::Left,
            KeyCode::Right => Key::Right,
            KeyCode::PageUp => Key::PgUp,
            KeyCode::PageDown => Key::PgDn,
            KeyCode::Home => Key::Home,
            KeyCode::End => Key::End,
            KeyCode::Backspace => Key::Backspace,
            // Ctrl+C quits like `q`.
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Key::Char('q'),
            KeyCode::Char(c) => Key::Char(c),
            _ => return None,
        };
        Some(key)
    }
}

impl Drop for CrosstermConsole {
    fn drop(&mut self) {
        let _ = execute!(self.out, ResetColor, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

impl Console for CrosstermConsole {
    fn size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn clear(&mut self) -> Result<()> {
        queue!(self.out, Clear(ClearType::All), MoveTo(0, 0))?;
        Ok(())
    }

    fn goto(&mut self, x: usize, y: usize) -> Result<()> {
        queue!(self.out, MoveTo(x.min(u16::MAX as usize) as u16, y.min(u16::MAX as usize) as u16))?;
        Ok(())
    }

    fn set_fg(&mut self, color: Color) -> Result<()> {
        queue!(self.out, SetForegroundColor(crossterm::style::Color::AnsiValue(color.0)))?;
        Ok(())
    }

    fn set_bg(&mut self, color: Color) -> Result<()> {
        queue!(self.out, SetBackgroundColor(crossterm::style::Color::AnsiValue(color.0)))?;
        Ok(())
    }

    fn reset_colors(&mut self) -> Result<()> {
        queue!(self.out, ResetColor)?;
        Ok(())
    }

    fn print(&mut self, s: &str) -> Result<()> {
        queue!(self.out, Print(s))?;
        Ok(())
    }

    fn puts(&mut self, s: &str) -> Result<()> {
        queue!(self.out, Print(s), Print("\r\n"))?;
        Ok(())
    }

    fn read_key(&mut self) -> Result<Option<Key>> {
        self.out.flush()?;
        loop {
            match event::read()? {
                Event::Key(k) if k.kind != KeyEventKind::Release => {
                    if let Some(key) = Self::map_key(k.code, k.modifiers) {
                        return Ok(Some(key));
                    }
                }
                Event::Resize(cols, rows) => {
                    self.rows = rows as usize;
                    self.cols = cols as usize;
                    // Delivered synchronously between keys: safe to redraw.
                    self.resize.notify(true);
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    fn take_resize(&mut self) -> Option<bool> {
        self.resize.take()
    }
}

/// Picks the console driver for the running platform.
pub fn platform_console() -> Result<Box<dyn Console>> {
    tracing::info!(os = std::env::consts::OS, "opening terminal console");
    Ok(Box::new(CrosstermConsole::open()?))
}

impl<C: Console + ?Sized> Console for Box<C> {
    fn size(&self) -> (usize, usize) {
        (**self).size()
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }

    fn goto(&mut self, x: usize, y: usize) -> Result<()> {
        (**self).goto(x, y)
    }

    fn set_fg(&mut self, color: Color) -> Result<()> {
        (**self).set_fg(color)
    }

    fn set_bg(&mut self, color: Color) -> Result<()> {
        (**self).set_bg(color)
    }

    fn reset_colors(&mut self) -> Result<()> {
        (**self).reset_colors()
    }

    fn print(&mut self, s: &str) -> Result<()> {
        (**self).print(s)
    }

    fn puts(&mut self, s: &str) -> Result<()> {
        (**self).puts(s)
    }

    fn read_key(&mut self) -> Result<Option<Key>> {
        (**self).read_key()
    }

    fn take_resize(&mut self) -> Option<bool> {
        (**self).take_resize()
    }
}

/// In-memory console: a cell grid plus a scripted key queue.
///
/// Text written past the right or bottom edge is clipped. Reading a key after
/// the script is exhausted is an error rather than a hang.
#[derive(Debug, Clone)]
pub struct VirtualConsole {
    screen: ScreenBuffer,
    x: usize,
    y: usize,
    fg: CellColor,
    bg: CellColor,
    keys: VecDeque<Key>,
    resize: PendingResize,
    // One wake-up without a key per resize, like a terminal resize event.
    wake: bool,
}

impl VirtualConsole {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            screen: ScreenBuffer::empty(Rect::new(0, 0, cols as u16, rows as u16)),
            x: 0,
            y: 0,
            fg: CellColor::Reset,
            bg: CellColor::Reset,
            keys: VecDeque::new(),
            resize: PendingResize::default(),
            wake: false,
        }
    }

    pub fn with_keys(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.keys.extend(keys);
        self
    }

    pub fn push_keys(&mut self, keys: impl IntoIterator<Item = Key>) {
        self.keys.extend(keys);
    }

    pub fn pending_keys(&self) -> usize {
        self.keys.len()
    }

    /// Changes the geometry and records a resize notification. The grid
    /// content is discarded.
    pub fn resize(&mut self, rows: usize, cols: usize, immediate: bool) {
        self.screen = ScreenBuffer::empty(Rect::new(0, 0, cols as u16, rows as u16));
        self.resize.notify(immediate);
        self.wake = true;
    }

    pub fn screen(&self) -> &ScreenBuffer {
        &self.screen
    }

    /// Text of row `y` with trailing blanks removed.
    pub fn row_text(&self, y: usize) -> String {
        let w = self.screen.area.width;
        let mut s = String::new();
        for x in 0..w {
            s.push_str(self.screen.get(x, y as u16).symbol());
        }
        s.trim_end().to_string()
    }

    pub fn text(&self) -> String {
        let h = self.screen.area.height as usize;
        let mut lines: Vec<String> = (0..h).map(|y| self.row_text(y)).collect();
        while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
            lines.pop();
        }
        lines.join("\n")
    }

    /// Background palette entry at a cell; `None` for the default background.
    pub fn bg_at(&self, x: usize, y: usize) -> Option<Color> {
        match self.screen.get(x as u16, y as u16).bg {
            CellColor::Indexed(i) => Some(Color(i)),
            _ => None,
        }
    }

    fn in_bounds(&self, x: usize, y: usize) -> bool {
        x < self.screen.area.width as usize && y < self.screen.area.height as usize
    }
}

impl Console for VirtualConsole {
    fn size(&self) -> (usize, usize) {
        (self.screen.area.height as usize, self.screen.area.width as usize)
    }

    fn clear(&mut self) -> Result<()> {
        self.screen.reset();
        self.x = 0;
        self.y = 0;
        Ok(())
    }

    fn goto(&mut self, x: usize, y: usize) -> Result<()> {
        self.x = x;
        self.y = y;
        Ok(())
    }

    fn set_fg(&mut self, color: Color) -> Result<()> {
        self.fg = CellColor::Indexed(color.0);
        Ok(())
    }

    fn set_bg(&mut self, color: Color) -> Result<()> {
        self.bg = CellColor::Indexed(color.0);
        Ok(())
    }

    fn reset_colors(&mut self) -> Result<()> {
        self.fg = CellColor::Reset;
        self.bg = CellColor::Reset;
        Ok(())
    }

    fn print(&mut self, s: &str) -> Result<()> {
        for ch in s.chars() {
            if ch == '\n' {
                self.x = 0;
                self.y += 1;
                continue;
            }
            if self.in_bounds(self.x, self.y) {
                let cell = self.screen.get_mut(self.x as u16, self.y as u16);
                cell.set_char(ch);
                cell.set_fg(self.fg);
                cell.set_bg(self.bg);
            }
            self.x += 1;
        }
        Ok(())
    }

    fn puts(&mut self, s: &str) -> Result<()> {
        self.print(s)?;
        self.x = 0;
        self.y += 1;
        Ok(())
    }

    fn read_key(&mut self) -> Result<Option<Key>> {
        if std::mem::take(&mut self.wake) {
            return Ok(None);
        }
        match self.keys.pop_front() {
            Some(k) => Ok(Some(k)),
            None => Err(VisError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "key script exhausted",
            ))),
        }
    }

    fn take_resize(&mut self) -> Option<bool> {
        self.resize.take()
    }
}
