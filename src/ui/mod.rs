use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, AppState, InputMode, Overlay, EMOJI_PALETTE};
use crate::chat::ChatMessage;
use crate::store::RemoteStore;

pub fn draw<S: RemoteStore>(f: &mut Frame<'_>, app: &App<S>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Length(1), // Banner
            Constraint::Min(1),    // Messages
            Constraint::Length(1), // Typing indicator
            Constraint::Length(3), // Input area
        ])
        .split(f.size());

    draw_title_bar(f, app, chunks[0]);
    draw_banner(f, app, chunks[1]);
    draw_messages(f, app, chunks[2]);
    draw_typing_indicator(f, app, chunks[3]);
    draw_input_area(f, app, chunks[4]);

    match &app.overlay {
        Overlay::ConfirmDelete { .. } => draw_confirm_delete(f),
        Overlay::EmojiPicker { selected } => draw_emoji_picker(f, *selected),
        Overlay::Help => draw_help(f),
        Overlay::None => {}
    }
}

fn draw_title_bar<S: RemoteStore>(f: &mut Frame<'_>, app: &App<S>, area: Rect) {
    let (status, style) = match &app.state {
        AppState::Connected => ("connected", Style::default().fg(Color::Green)),
        AppState::Connecting => ("connecting...", Style::default().fg(Color::Yellow)),
        AppState::Error(_) => ("degraded", Style::default().fg(Color::Red)),
    };

    let who = if app.profile.has_nickname() {
        app.profile.nickname.clone()
    } else {
        "no nickname".to_string()
    };
    let title = format!(
        " VibeChat | {} ({}) | {} ",
        who,
        short_id(&app.identity.user_id),
        status
    );

    let block = Block::default()
        .borders(Borders::ALL)
        .style(style)
        .title(" VibeChat ");
    let paragraph = Paragraph::new(title)
        .block(block)
        .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
}

fn draw_banner<S: RemoteStore>(f: &mut Frame<'_>, app: &App<S>, area: Rect) {
    let Some(banner) = &app.banner else {
        return;
    };
    let paragraph = Paragraph::new(Line::from(Span::styled(
        banner.as_str(),
        Style::default().fg(Color::Red),
    )))
    .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
}

fn draw_messages<S: RemoteStore>(f: &mut Frame<'_>, app: &App<S>, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Room ")
        .style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines = Vec::new();

    if !app.timeline.is_loaded() {
        lines.push(hint_line("Loading messages..."));
    } else if app.timeline.is_empty() {
        lines.push(hint_line("No messages yet. Start the conversation!"));
    } else {
        for message in app.visible_messages(inner.height as usize) {
            lines.push(message_line(message, &app.identity.user_id));
        }
    }

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    f.render_widget(paragraph, inner);
}

fn hint_line(text: &str) -> Line<'_> {
    Line::from(Span::styled(
        text,
        Style::default()
            .fg(Color::Gray)
            .add_modifier(Modifier::ITALIC),
    ))
}

fn message_line<'a>(message: &'a ChatMessage, user_id: &str) -> Line<'a> {
    let stamp = match message.sent_at {
        Some(at) => format!("[{}] ", at.format("%H:%M:%S")),
        None => "[sending...] ".to_string(),
    };
    let nick_color = if message.is_own(user_id) {
        Color::Green
    } else {
        Color::Magenta
    };

    let mut spans = vec![
        Span::styled(stamp, Style::default().fg(Color::Gray)),
        Span::styled(
            format!("<{}> ", message.display_name()),
            Style::default().fg(nick_color),
        ),
        Span::raw(message.text.as_str()),
    ];
    if message.edited_at.is_some() {
        spans.push(Span::styled(
            " (edited)",
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::ITALIC),
        ));
    }
    Line::from(spans)
}

fn draw_typing_indicator<S: RemoteStore>(f: &mut Frame<'_>, app: &App<S>, area: Rect) {
    let names = app.typing_names();
    if names.is_empty() {
        return;
    }
    let verb = if names.len() > 1 { "are" } else { "is" };
    let text = format!("{} {} typing...", names.join(", "), verb);
    let paragraph = Paragraph::new(Line::from(Span::styled(
        text,
        Style::default()
            .fg(Color::Gray)
            .add_modifier(Modifier::ITALIC),
    )))
    .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
}

fn draw_input_area<S: RemoteStore>(f: &mut Frame<'_>, app: &App<S>, area: Rect) {
    let (indicator, style) = match app.input_mode {
        InputMode::Normal => (
            "[NORMAL] i=compose, Up/Down=scroll, q=quit".to_string(),
            Style::default().fg(Color::White),
        ),
        InputMode::Insert => {
            let hint = if app.composer.is_editing() {
                "[EDIT] ENTER=save, ESC=discard"
            } else {
                "[INPUT] ENTER=send, ESC=normal, Ctrl+E=emoji, /help=commands"
            };
            (hint.to_string(), Style::default().fg(Color::Green))
        }
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(indicator)
        .style(style);
    let paragraph = Paragraph::new(app.composer.draft())
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);

    if app.input_mode == InputMode::Insert && app.overlay == Overlay::None {
        f.set_cursor(area.x + app.composer.cursor() as u16 + 1, area.y + 1);
    }
}

fn draw_confirm_delete(f: &mut Frame<'_>) {
    let area = centered_rect(46, 5, f.size());
    f.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Confirm Deletion ")
        .style(Style::default().fg(Color::Red));
    let lines = vec![
        Line::from("Are you sure you want to delete this message?"),
        Line::from(Span::styled(
            "y = delete, n = keep",
            Style::default().fg(Color::Gray),
        )),
    ];
    let paragraph = Paragraph::new(lines)
        .block(block)
        .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
}

fn draw_emoji_picker(f: &mut Frame<'_>, selected: usize) {
    let area = centered_rect(44, 5, f.size());
    f.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Emoji ")
        .style(Style::default().fg(Color::Yellow));

    let mut spans = Vec::new();
    for (index, emoji) in EMOJI_PALETTE.iter().enumerate() {
        let style = if index == selected {
            Style::default().bg(Color::DarkGray)
        } else {
            Style::default()
        };
        spans.push(Span::styled(format!(" {emoji} "), style));
    }
    let lines = vec![
        Line::from(spans),
        Line::from(Span::styled(
            "Left/Right=select, Enter=insert, Esc=close",
            Style::default().fg(Color::Gray),
        )),
    ];
    let paragraph = Paragraph::new(lines)
        .block(block)
        .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
}

fn draw_help(f: &mut Frame<'_>) {
    let area = centered_rect(56, 14, f.size());
    f.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Help ")
        .style(Style::default().fg(Color::Blue));
    let lines = vec![
        Line::from("/nick <name>   set your nickname"),
        Line::from("/edit [n]      edit your n-th most recent message"),
        Line::from("/delete [n]    delete your n-th most recent message"),
        Line::from("/emoji         open the emoji picker"),
        Line::from("/quit          exit"),
        Line::from(""),
        Line::from("i=compose, ESC=back, Enter=send"),
        Line::from("Up (empty input) recalls your last message for editing"),
        Line::from("Up/Down scroll the room in normal mode"),
        Line::from(""),
        Line::from(Span::styled(
            "Press Esc to close",
            Style::default().fg(Color::Gray),
        )),
    ];
    let paragraph = Paragraph::new(lines).block(block);
    f.render_widget(paragraph, area);
}

/// Fixed-size rect centered in `r`, clamped to its bounds.
fn centered_rect(width: u16, height: u16, r: Rect) -> Rect {
    let width = width.min(r.width);
    let height = height.min(r.height);
    Rect {
        x: r.x + (r.width - width) / 2,
        y: r.y + (r.height - height) / 2,
        width,
        height,
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
