use ratatui::style::Style;
use ratatui::text::{Line, Span};

/// Word-wrapped text plus the (line, column) of every char boundary, used to
/// place the input cursor.
#[derive(Debug, Clone)]
pub struct WrappedText {
    pub rendered: String,
    pub positions: Vec<(u16, u16)>,
    pub line_count: u16,
}

pub fn wrap_word_with_positions(text: &str, width: u16) -> WrappedText {
    let width = width.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut rendered = String::with_capacity(text.len());
    let mut positions = Vec::with_capacity(chars.len() + 1);
    let mut line = 0u16;
    let mut col = 0u16;
    positions.push((line, col));

    for idx in 0..chars.len() {
        let ch = chars[idx];
        if ch == '\n' {
            break_line(&mut rendered, &mut line, &mut col);
            positions.push((line, col));
            continue;
        }
        if col >= width || word_overflows(&chars, idx, col, width) {
            break_line(&mut rendered, &mut line, &mut col);
        }
        rendered.push(ch);
        col = col.saturating_add(1);
        if col >= width {
            break_line(&mut rendered, &mut line, &mut col);
        }
        positions.push((line, col));
    }

    let line_count = positions.last().map_or(0, |(l, _)| *l).saturating_add(1);
    WrappedText {
        rendered,
        positions,
        line_count,
    }
}

fn break_line(rendered: &mut String, line: &mut u16, col: &mut u16) {
    rendered.push('\n');
    *line = line.saturating_add(1);
    *col = 0;
}

/// True at the first char of a word that fits on a fresh line but not on the
/// current one.
fn word_overflows(chars: &[char], idx: usize, col: u16, width: u16) -> bool {
    if col == 0 || chars[idx].is_whitespace() {
        return false;
    }
    if idx > 0 && !chars[idx - 1].is_whitespace() {
        return false;
    }
    let word_len = chars[idx..]
        .iter()
        .take_while(|c| !c.is_whitespace())
        .count() as u16;
    word_len <= width && col.saturating_add(word_len) > width
}

/// Wraps one styled line to `width`, keeping each char's style. Break points
/// come from `wrap_word_with_positions` on the plain text.
pub fn wrap_styled_line(line: &Line<'_>, width: u16) -> Vec<Line<'static>> {
    let styled: Vec<(char, Style)> = line
        .spans
        .iter()
        .flat_map(|span| {
            let style = line.style.patch(span.style);
            span.content
                .chars()
                .filter(|ch| *ch != '\n')
                .map(move |ch| (ch, style))
        })
        .collect();
    if styled.is_empty() {
        return vec![Line::default()];
    }
    let plain: String = styled.iter().map(|(ch, _)| *ch).collect();
    let rendered = wrap_word_with_positions(&plain, width).rendered;

    let mut out = Vec::new();
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut run = String::new();
    let mut run_style = Style::default();
    let mut source = styled.into_iter();
    for ch in rendered.chars() {
        if ch == '\n' {
            flush_run(&mut spans, &mut run, run_style);
            out.push(Line::from(std::mem::take(&mut spans)));
            continue;
        }
        let Some((_, style)) = source.next() else {
            break;
        };
        if style != run_style {
            flush_run(&mut spans, &mut run, run_style);
            run_style = style;
        }
        run.push(ch);
    }
    flush_run(&mut spans, &mut run, run_style);
    if !spans.is_empty() || out.is_empty() {
        out.push(Line::from(spans));
    }
    out
}

fn flush_run(spans: &mut Vec<Span<'static>>, run: &mut String, style: Style) {
    if !run.is_empty() {
        spans.push(Span::styled(std::mem::take(run), style));
    }
}
