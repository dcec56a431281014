use crate::console::{Console, Key};
use crate::error::Result;

const DOUBLE_CHARSET: [char; 6] = ['╔', '╗', '╚', '╝', '═', '║'];

const CHAR_TL: usize = 0;
const CHAR_TR: usize = 1;
const CHAR_BL: usize = 2;
const CHAR_BR: usize = 3;
const CHAR_H: usize = 4;
const CHAR_V: usize = 5;

const BOX_MARGIN: usize = 10;
const BOX_HEIGHT: usize = 10;

fn box_geometry(ui: &dyn Console) -> (usize, usize, usize) {
    let (rows, cols) = ui.size();
    let top_y = (rows / 2).saturating_sub(5);
    let w = cols.saturating_sub(2 * BOX_MARGIN).max(4);
    (BOX_MARGIN.min(cols.saturating_sub(w)), top_y, w)
}

pub fn draw_rectangle(ui: &mut dyn Console, x: usize, y: usize, w: usize, h: usize) -> Result<()> {
    let inner = w.saturating_sub(2);
    let horiz: String = std::iter::repeat(DOUBLE_CHARSET[CHAR_H]).take(inner).collect();

    ui.goto(x, y)?;
    ui.print(&format!("{}{}{}", DOUBLE_CHARSET[CHAR_TL], horiz, DOUBLE_CHARSET[CHAR_TR]))?;
    for i in (y + 1)..(y + h) {
        ui.goto(x, i)?;
        ui.print(&format!("{}{}{}", DOUBLE_CHARSET[CHAR_V], " ".repeat(inner), DOUBLE_CHARSET[CHAR_V]))?;
    }
    ui.goto(x, y + h)?;
    ui.print(&format!("{}{}{}", DOUBLE_CHARSET[CHAR_BL], horiz, DOUBLE_CHARSET[CHAR_BR]))?;
    Ok(())
}

fn draw_frame(ui: &mut dyn Console, header: &str) -> Result<(usize, usize, usize)> {
    let (x, top_y, w) = box_geometry(ui);
    ui.reset_colors()?;
    draw_rectangle(ui, x, top_y, w, BOX_HEIGHT)?;
    let cols = ui.cols();
    ui.goto((cols / 2).saturating_sub(header.chars().count() / 2 + 1), top_y)?;
    ui.print(&format!(" {header} "))?;
    Ok((x, top_y, w))
}

/// Modal with a message and an OK button; returns once Enter is pressed.
pub fn message_box(ui: &mut dyn Console, header: &str, msg: &str) -> Result<()> {
    let (x, top_y, w) = draw_frame(ui, header)?;
    let inner = w.saturating_sub(2);

    // Wrap the message inside the frame, keeping the button row free.
    let mut row = top_y + 1;
    for line in msg.lines() {
        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(inner.max(1)) {
            if row >= top_y + BOX_HEIGHT - 2 {
                break;
            }
            ui.goto(x + 1, row)?;
            ui.print(&chunk.iter().collect::<String>())?;
            row += 1;
        }
    }

    let cols = ui.cols();
    ui.goto((cols / 2).saturating_sub(10), top_y + BOX_HEIGHT - 2)?;
    ui.print("[ OK ]")?;

    loop {
        if let Some(Key::Enter) = ui.read_key()? {
            return Ok(());
        }
    }
}

/// Modal single-line editor. Returns `None` when the answer is empty.
pub fn input_str(ui: &mut dyn Console, header: &str, prompt: &str) -> Result<Option<String>> {
    let (x, top_y, w) = draw_frame(ui, header)?;
    let inner = w.saturating_sub(2);

    ui.goto(x + 1, top_y + 1)?;
    ui.print(prompt)?;

    let mut answer = String::new();
    loop {
        ui.goto(x + 1, top_y + 2)?;
        let shown: String = answer.chars().rev().take(inner.saturating_sub(1)).collect::<Vec<_>>().into_iter().rev().collect();
        ui.print(&format!("{:<width$}", shown, width = inner))?;

        match ui.read_key()? {
            Some(Key::Enter) => break,
            Some(Key::Backspace) => {
                answer.pop();
            }
            Some(Key::Char(c)) if !c.is_control() => answer.push(c),
            _ => {}
        }
    }

    let answer = answer.trim().to_string();
    Ok(if answer.is_empty() { None } else { Some(answer) })
}
