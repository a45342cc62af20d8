use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::{io, time::Duration};
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};

use chatbook::models::{DeliveryStatus, Message};
use chatbook::session::ConnectionState;
use chatbook::state::ChatState;

// Export types needed by main module
pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

/// What the main loop should do after a key press.
#[derive(Debug, PartialEq, Eq)]
pub enum UiAction {
    Quit,
    Send { to: String, content: String },
    Select(String),
}

enum Tab {
    Messages,
    Contacts,
}

pub struct ChatUI {
    input: Input,
    active_tab: Tab,
    current_contact_index: usize,
    notice: Option<String>,
}

impl ChatUI {
    pub fn new() -> Self {
        ChatUI {
            input: Input::default(),
            active_tab: Tab::Contacts,
            current_contact_index: 0,
            notice: None,
        }
    }

    /// One-line notice shown in the status bar until replaced.
    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    pub fn handle_input(&mut self, state: &ChatState) -> Result<Option<UiAction>> {
        if !event::poll(Duration::from_millis(50))? {
            return Ok(None);
        }
        let event = event::read()?;
        let Event::Key(key) = event else {
            return Ok(None);
        };
        if key.kind != KeyEventKind::Press {
            return Ok(None);
        }

        if key.code == KeyCode::Esc
            || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
        {
            return Ok(Some(UiAction::Quit));
        }
        if key.code == KeyCode::Tab {
            self.active_tab = match self.active_tab {
                Tab::Messages => Tab::Contacts,
                Tab::Contacts => Tab::Messages,
            };
            return Ok(None);
        }

        match self.active_tab {
            Tab::Contacts => {
                let contacts = state.contacts();
                if contacts.is_empty() {
                    return Ok(None);
                }
                match key.code {
                    KeyCode::Up => {
                        self.current_contact_index = self.current_contact_index.saturating_sub(1);
                    }
                    KeyCode::Down => {
                        if self.current_contact_index + 1 < contacts.len() {
                            self.current_contact_index += 1;
                        }
                    }
                    KeyCode::Enter => {
                        self.active_tab = Tab::Messages;
                    }
                    _ => return Ok(None),
                }
                let index = self.current_contact_index.min(contacts.len() - 1);
                let contact = &contacts[index].username;
                if state.active_contact() != Some(contact.as_str()) {
                    return Ok(Some(UiAction::Select(contact.clone())));
                }
                Ok(None)
            }
            Tab::Messages => {
                if key.code == KeyCode::Enter {
                    let content = self.input.value().to_string();
                    let Some(to) = state.active_contact() else {
                        self.set_notice("Pick a contact first (Tab to the contact list)");
                        return Ok(None);
                    };
                    if content.trim().is_empty() {
                        return Ok(None);
                    }
                    self.input.reset();
                    return Ok(Some(UiAction::Send {
                        to: to.to_string(),
                        content,
                    }));
                }
                self.input.handle_event(&event);
                Ok(None)
            }
        }
    }

    pub fn draw<B: Backend>(&self, frame: &mut Frame<B>, state: &ChatState) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(25), // Contacts panel
                Constraint::Percentage(75), // Chat panel
            ])
            .split(size);

        let chat_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // Messages area
                Constraint::Length(3), // Input box
                Constraint::Length(1), // Status line
            ])
            .split(chunks[1]);

        let contacts: Vec<ListItem> = state
            .contacts()
            .iter()
            .map(|c| {
                let marker = if state.active_contact() == Some(c.username.as_str()) {
                    "> "
                } else {
                    "  "
                };
                ListItem::new(format!("{}{}", marker, c.username))
            })
            .collect();

        let mut contact_state = ListState::default();
        if !contacts.is_empty() {
            contact_state.select(Some(self.current_contact_index.min(contacts.len() - 1)));
        }
        let contacts_list = List::new(contacts)
            .block(
                Block::default()
                    .title("Contacts (Tab to focus)")
                    .borders(Borders::ALL)
                    .border_style(match self.active_tab {
                        Tab::Contacts => Style::default().fg(Color::Yellow),
                        _ => Style::default(),
                    }),
            )
            .highlight_style(Style::default().add_modifier(Modifier::BOLD));
        frame.render_stateful_widget(contacts_list, chunks[0], &mut contact_state);

        draw_messages(frame, &state.view(), chat_chunks[0], state);

        let input_block = Block::default()
            .title("Message")
            .borders(Borders::ALL)
            .border_style(match self.active_tab {
                Tab::Messages => Style::default().fg(Color::Yellow),
                _ => Style::default(),
            });
        let input_widget = Paragraph::new(self.input.value()).block(input_block);
        frame.render_widget(input_widget, chat_chunks[1]);

        let (connection_text, connection_style) = match state.connection() {
            ConnectionState::Connected => ("connected", Style::default().fg(Color::Green)),
            ConnectionState::Connecting => ("connecting", Style::default().fg(Color::Yellow)),
            ConnectionState::Disconnected => ("offline", Style::default().fg(Color::Red)),
        };
        let mut status_spans = vec![
            Span::styled(
                format!("{} [", state.identity().unwrap_or("-")),
                Style::default().fg(Color::Gray),
            ),
            Span::styled(connection_text, connection_style),
            Span::styled("] ESC quit | TAB switch | Up/Down pick", Style::default().fg(Color::Gray)),
        ];
        if let Some(notice) = &self.notice {
            status_spans.push(Span::styled(
                format!(" | {}", notice),
                Style::default().fg(Color::Yellow),
            ));
        }
        frame.render_widget(Paragraph::new(Line::from(status_spans)), chat_chunks[2]);

        if let Tab::Messages = self.active_tab {
            frame.set_cursor(
                chat_chunks[1].x + self.input.cursor() as u16 + 1,
                chat_chunks[1].y + 1,
            );
        }
    }
}

fn status_ticks(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Sent => " ✓",
        DeliveryStatus::Delivered => " ✓✓",
        DeliveryStatus::Seen => " ✓✓✓",
    }
}

fn draw_messages<B: Backend>(f: &mut Frame<B>, messages: &[Message], area: Rect, state: &ChatState) {
    let me = state.identity().unwrap_or_default();
    let wrap_width = area.width.saturating_sub(2).max(1) as usize; // Account for borders

    let items: Vec<ListItem> = messages
        .iter()
        .flat_map(|m| {
            let timestamp = m
                .parsed_timestamp()
                .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| m.timestamp.clone());

            let outgoing = m.from == me;
            let full_content = if outgoing {
                format!("[{}] You: {}{}", timestamp, m.content, status_ticks(m.status))
            } else {
                format!("[{}] {}: {}", timestamp, m.from, m.content)
            };

            let style = if !outgoing {
                Style::default()
            } else {
                match m.status {
                    DeliveryStatus::Sent => Style::default().fg(Color::Blue),
                    DeliveryStatus::Delivered | DeliveryStatus::Seen => {
                        Style::default().fg(Color::Green)
                    }
                }
            };

            let wrapped_lines: Vec<String> = wrap(&full_content, wrap_width)
                .into_iter()
                .map(|l| l.into_owned())
                .collect();
            wrapped_lines
                .into_iter()
                .map(move |line| ListItem::new(Text::from(line)).style(style))
        })
        .collect();

    let title = match state.active_contact() {
        Some(contact) => format!("Messages with {}", contact),
        None => "Messages".to_string(),
    };

    // Keep the newest line in view
    let mut list_state = ListState::default();
    if !items.is_empty() {
        list_state.select(Some(items.len() - 1));
    }

    let messages_list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default());
    f.render_stateful_widget(messages_list, area, &mut list_state);
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
