use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chat::{active_typists, ChatMessage, Composer, SubmitIntent, Timeline, TypingDebouncer};
use crate::profile::{Profile, MAX_NICKNAME_CHARS};
use crate::store::{
    Identity, RemoteStore, StoreError, StoreEvent, SubscriptionHandle, MESSAGES, TYPING_STATUS,
};

/// Emojis offered by the picker overlay.
pub const EMOJI_PALETTE: [&str; 10] = ["😊", "😂", "❤️", "👍", "🙏", "🔥", "🎉", "💡", "🚀", "✨"];

#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Connecting,
    Connected,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputMode {
    Normal,
    Insert,
}

/// Modal layered over the chat view. At most one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    None,
    ConfirmDelete { target_id: String },
    EmojiPicker { selected: usize },
    Help,
}

pub struct App<S: RemoteStore> {
    pub should_quit: bool,
    pub state: AppState,
    pub input_mode: InputMode,
    pub overlay: Overlay,
    pub scroll_offset: usize,

    pub identity: Identity,
    pub profile: Profile,
    profile_path: Option<PathBuf>,

    pub timeline: Timeline,
    pub typists: BTreeMap<String, String>,
    pub composer: Composer,
    pub banner: Option<String>,

    store: Arc<S>,
    typing: TypingDebouncer,
    messages_rx: mpsc::UnboundedReceiver<StoreEvent>,
    typing_rx: mpsc::UnboundedReceiver<StoreEvent>,
    // Dropping the handles cancels the feeds on teardown.
    _subscriptions: Vec<SubscriptionHandle>,
}

impl<S: RemoteStore> App<S> {
    pub async fn new(
        store: Arc<S>,
        profile: Profile,
        profile_path: Option<PathBuf>,
    ) -> Result<Self> {
        let identity = store
            .authenticate()
            .await
            .context("sign-in to the sync service failed")?;

        let (messages_sub, messages_rx) = store.subscribe(MESSAGES);
        let (typing_sub, typing_rx) = store.subscribe(TYPING_STATUS);
        info!(user_id = %identity.user_id, "session ready");

        Ok(Self {
            should_quit: false,
            // Connected once the first messages snapshot lands.
            state: AppState::Connecting,
            input_mode: InputMode::Normal,
            overlay: Overlay::None,
            scroll_offset: 0,

            identity,
            profile,
            profile_path,

            timeline: Timeline::new(),
            typists: BTreeMap::new(),
            composer: Composer::new(),
            banner: None,

            store,
            typing: TypingDebouncer::default(),
            messages_rx,
            typing_rx,
            _subscriptions: vec![messages_sub, typing_sub],
        })
    }

    pub async fn handle_input(&mut self, event: Event) -> Result<()> {
        if let Event::Key(key) = event {
            self.handle_key_event(key).await?;
        }
        Ok(())
    }

    async fn handle_key_event(&mut self, key: KeyEvent) -> Result<()> {
        if self.overlay != Overlay::None {
            return self.handle_overlay_key(key).await;
        }

        match self.input_mode {
            InputMode::Normal => match key.code {
                KeyCode::Char('q') => {
                    self.should_quit = true;
                }
                KeyCode::Char('i') => {
                    self.input_mode = InputMode::Insert;
                }
                KeyCode::Up => self.scroll_up(1),
                KeyCode::Down => self.scroll_down(1),
                KeyCode::PageUp => self.scroll_up(10),
                KeyCode::PageDown => self.scroll_down(10),
                _ => {}
            },
            InputMode::Insert => match key.code {
                KeyCode::Enter => {
                    self.submit_input().await?;
                }
                KeyCode::Char('e') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.overlay = Overlay::EmojiPicker { selected: 0 };
                }
                KeyCode::Char(c) => {
                    self.composer.insert_char(c);
                    self.after_draft_change();
                }
                KeyCode::Backspace => {
                    if self.composer.delete_back() {
                        self.after_draft_change();
                    }
                }
                KeyCode::Delete => {
                    if self.composer.delete_forward() {
                        self.after_draft_change();
                    }
                }
                KeyCode::Left => self.composer.move_left(),
                KeyCode::Right => self.composer.move_right(),
                KeyCode::Home => self.composer.move_home(),
                KeyCode::End => self.composer.move_end(),
                KeyCode::Up => {
                    // Recall the latest own message for editing, like the
                    // up-arrow shortcut in most chat clients.
                    if self.composer.draft().is_empty() && !self.composer.is_editing() {
                        self.begin_edit_nth(0);
                    }
                }
                KeyCode::Esc => {
                    if self.composer.cancel_edit() {
                        self.banner = None;
                    } else {
                        self.input_mode = InputMode::Normal;
                    }
                }
                _ => {}
            },
        }
        Ok(())
    }

    async fn handle_overlay_key(&mut self, key: KeyEvent) -> Result<()> {
        match self.overlay.clone() {
            Overlay::ConfirmDelete { target_id } => match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    self.overlay = Overlay::None;
                    self.delete_message(&target_id).await;
                }
                KeyCode::Char('n') | KeyCode::Esc => {
                    self.overlay = Overlay::None;
                }
                _ => {}
            },
            Overlay::EmojiPicker { selected } => match key.code {
                KeyCode::Left => {
                    self.overlay = Overlay::EmojiPicker {
                        selected: (selected + EMOJI_PALETTE.len() - 1) % EMOJI_PALETTE.len(),
                    };
                }
                KeyCode::Right => {
                    self.overlay = Overlay::EmojiPicker {
                        selected: (selected + 1) % EMOJI_PALETTE.len(),
                    };
                }
                KeyCode::Enter => {
                    self.overlay = Overlay::None;
                    self.composer.insert_str(EMOJI_PALETTE[selected]);
                    // An emoji counts as a keystroke for the typing signal.
                    self.after_draft_change();
                }
                KeyCode::Esc => {
                    self.overlay = Overlay::None;
                }
                _ => {}
            },
            Overlay::Help => match key.code {
                KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => {
                    self.overlay = Overlay::None;
                }
                _ => {}
            },
            Overlay::None => {}
        }
        Ok(())
    }

    async fn submit_input(&mut self) -> Result<()> {
        let draft = self.composer.draft().trim().to_string();
        if draft.starts_with('/') {
            self.composer.clear();
            self.handle_command(&draft);
            return Ok(());
        }
        self.submit_message().await;
        Ok(())
    }

    fn handle_command(&mut self, input: &str) {
        let parts: Vec<&str> = input[1..].split_whitespace().collect();
        if parts.is_empty() {
            return;
        }

        match parts[0].to_lowercase().as_str() {
            "nick" | "n" => {
                let nick = parts[1..].join(" ");
                if nick.is_empty() {
                    self.banner = Some("Usage: /nick <nickname>".to_string());
                    return;
                }
                if nick.chars().count() > MAX_NICKNAME_CHARS {
                    self.banner = Some(format!(
                        "Nickname must be at most {MAX_NICKNAME_CHARS} characters."
                    ));
                    return;
                }
                self.profile.nickname = nick.clone();
                if let Err(err) = self.profile.save(self.profile_path.as_deref()) {
                    warn!(error = %err, "failed to persist nickname");
                }
                self.banner = Some(format!("Nickname set to {nick}."));
            }
            "edit" | "e" => match Self::parse_index(&parts) {
                Some(nth) => {
                    if !self.begin_edit_nth(nth) {
                        self.banner = Some("No message of yours to edit.".to_string());
                    }
                }
                None => self.banner = Some("Usage: /edit [n]".to_string()),
            },
            "delete" | "del" | "d" => match Self::parse_index(&parts) {
                Some(nth) => match self.timeline.own_recent(&self.identity.user_id, nth) {
                    Some(message) => {
                        self.overlay = Overlay::ConfirmDelete {
                            target_id: message.id.clone(),
                        };
                    }
                    None => self.banner = Some("No message of yours to delete.".to_string()),
                },
                None => self.banner = Some("Usage: /delete [n]".to_string()),
            },
            "emoji" => {
                self.overlay = Overlay::EmojiPicker { selected: 0 };
            }
            "help" | "h" | "commands" => {
                self.overlay = Overlay::Help;
            }
            "quit" | "q" | "exit" => {
                self.should_quit = true;
            }
            other => {
                self.banner = Some(format!("Unknown command: /{other}. Type /help."));
            }
        }
    }

    /// `/edit 2` targets the second most recent own message; a bare
    /// `/edit` the most recent one.
    fn parse_index(parts: &[&str]) -> Option<usize> {
        match parts.get(1) {
            None => Some(0),
            Some(raw) => raw.parse::<usize>().ok().filter(|n| *n >= 1).map(|n| n - 1),
        }
    }

    fn begin_edit_nth(&mut self, nth: usize) -> bool {
        let Some(message) = self
            .timeline
            .own_recent(&self.identity.user_id, nth)
            .cloned()
        else {
            return false;
        };
        self.composer.begin_edit(&message);
        self.input_mode = InputMode::Insert;
        self.banner = None;
        true
    }

    async fn submit_message(&mut self) {
        if !self.profile.has_nickname() {
            self.banner =
                Some("Please set your nickname with /nick before sending messages.".to_string());
            return;
        }
        let Some(intent) = self.composer.submission() else {
            self.banner = Some("Please type a message before sending.".to_string());
            return;
        };

        let result = match &intent {
            SubmitIntent::Create { text } => self
                .store
                .create(
                    MESSAGES,
                    json!({
                        "sender_id": self.identity.user_id,
                        "sender_nickname": self.profile.nickname,
                        "text": text,
                    }),
                )
                .await
                .map(|_| ()),
            SubmitIntent::Update { target_id, text } => {
                self.store
                    .update(MESSAGES, target_id, json!({ "text": text }))
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.composer.clear();
                self.banner = None;
                // Composing is over; clear presence now instead of letting
                // the debounced request land later.
                self.publish_typing_now(false);
            }
            Err(err) => {
                // Draft and edit target stay as they were so the user can
                // resubmit.
                warn!(error = %err, "message write failed");
                self.banner = Some(format!("Failed to send message: {err}"));
            }
        }
    }

    async fn delete_message(&mut self, id: &str) {
        match self.store.delete(MESSAGES, id).await {
            Ok(()) => {
                self.banner = None;
            }
            Err(StoreError::PermissionDenied) => {
                self.banner = Some("You can only delete your own messages.".to_string());
            }
            Err(err) => {
                warn!(error = %err, "delete failed");
                self.banner = Some(format!("Failed to delete message: {err}"));
            }
        }
    }

    /// Request the debounced typing signal after the draft changed.
    fn after_draft_change(&mut self) {
        if !self.profile.has_nickname() {
            return;
        }
        self.typing
            .request(!self.composer.draft().is_empty(), Instant::now());
    }

    /// Cancel any pending debounced request and publish `value` right away.
    fn publish_typing_now(&mut self, value: bool) {
        self.typing.cancel();
        self.spawn_typing_publish(value);
    }

    fn spawn_typing_publish(&self, value: bool) {
        let store = Arc::clone(&self.store);
        let user_id = self.identity.user_id.clone();
        let nickname = self.profile.nickname.clone();
        tokio::spawn(async move {
            let fields = json!({ "is_typing": value, "nickname": nickname });
            if let Err(err) = store.upsert(TYPING_STATUS, &user_id, fields).await {
                warn!(error = %err, "failed to publish typing state");
            }
        });
    }

    /// Drain pending snapshot events and fire the typing debouncer once its
    /// quiet period has elapsed. Called from the UI tick; this is the only
    /// place the timeline and roster are mutated.
    pub fn on_tick(&mut self) {
        while let Ok(event) = self.messages_rx.try_recv() {
            match event {
                StoreEvent::Snapshot(snapshot) => {
                    self.timeline.apply_snapshot(&snapshot);
                    self.state = AppState::Connected;
                }
                StoreEvent::Lost(err) => {
                    // The previous materialized view stays on screen.
                    warn!(error = %err, "messages subscription error");
                    self.banner = Some(format!("Message feed error: {err}"));
                    self.state = AppState::Error(err.to_string());
                }
            }
        }

        while let Ok(event) = self.typing_rx.try_recv() {
            match event {
                StoreEvent::Snapshot(snapshot) => {
                    self.typists = active_typists(&snapshot, &self.identity.user_id, Utc::now());
                }
                StoreEvent::Lost(err) => {
                    warn!(error = %err, "typing subscription error");
                }
            }
        }

        if let Some(value) = self.typing.poll(Instant::now()) {
            self.spawn_typing_publish(value);
        }
    }

    fn scroll_up(&mut self, lines: usize) {
        let max = self.timeline.len().saturating_sub(1);
        self.scroll_offset = (self.scroll_offset + lines).min(max);
    }

    fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    /// The window of messages that fits on screen, pinned to the newest
    /// message unless the user scrolled up.
    pub fn visible_messages(&self, height: usize) -> &[ChatMessage] {
        let messages = self.timeline.messages();
        let end = messages.len().saturating_sub(self.scroll_offset);
        let start = end.saturating_sub(height);
        &messages[start..end]
    }

    /// Display names of everyone else typing, for the indicator line.
    pub fn typing_names(&self) -> Vec<&str> {
        self.typists.values().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::store::memory::MemoryStore;

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn profile(nickname: &str) -> Profile {
        Profile {
            nickname: nickname.to_string(),
        }
    }

    async fn app_with(store: Arc<MemoryStore>, nickname: &str) -> App<MemoryStore> {
        App::new(store, profile(nickname), None).await.unwrap()
    }

    async fn press(app: &mut App<MemoryStore>, code: KeyCode) {
        app.handle_input(key(code)).await.unwrap();
    }

    async fn type_text(app: &mut App<MemoryStore>, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c)).await;
        }
    }

    async fn clear_draft(app: &mut App<MemoryStore>) {
        press(app, KeyCode::End).await;
        while !app.composer.draft().is_empty() {
            press(app, KeyCode::Backspace).await;
        }
    }

    async fn send(app: &mut App<MemoryStore>, text: &str) {
        type_text(app, text).await;
        press(app, KeyCode::Enter).await;
        app.on_tick();
    }

    #[tokio::test]
    async fn submit_creates_a_message() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        send(&mut app, "hi there").await;

        assert_eq!(app.timeline.len(), 1);
        let message = &app.timeline.messages()[0];
        assert_eq!(message.text, "hi there");
        assert!(message.is_own(&app.identity.user_id));
        assert_eq!(message.display_name(), "tester");
        assert_eq!(app.composer.draft(), "");
        assert_eq!(app.banner, None);
    }

    #[tokio::test]
    async fn empty_submit_is_rejected_before_any_write() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        press(&mut app, KeyCode::Enter).await;
        app.on_tick();

        assert!(app.banner.as_deref().unwrap().contains("type a message"));
        assert!(store.documents(MESSAGES).is_empty());
        assert!(!app.composer.is_editing());
    }

    #[tokio::test]
    async fn missing_nickname_blocks_submission() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "").await;
        press(&mut app, KeyCode::Char('i')).await;

        type_text(&mut app, "hello").await;
        press(&mut app, KeyCode::Enter).await;

        assert!(app.banner.as_deref().unwrap().contains("nickname"));
        assert!(store.documents(MESSAGES).is_empty());
        assert_eq!(app.composer.draft(), "hello");
    }

    #[tokio::test]
    async fn failed_write_keeps_draft_and_edit_state() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        store.fail_writes(true);
        type_text(&mut app, "hello").await;
        press(&mut app, KeyCode::Enter).await;

        assert!(app.banner.as_deref().unwrap().contains("Failed to send"));
        assert_eq!(app.composer.draft(), "hello");

        store.fail_writes(false);
        press(&mut app, KeyCode::Enter).await;
        app.on_tick();

        assert_eq!(app.timeline.len(), 1);
        assert_eq!(app.composer.draft(), "");
        assert_eq!(app.banner, None);
    }

    #[tokio::test]
    async fn edit_command_rewrites_the_message_in_place() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        send(&mut app, "helo").await;
        send(&mut app, "/edit").await;
        assert!(app.composer.is_editing());
        assert_eq!(app.composer.draft(), "helo");

        send(&mut app, "!").await;

        assert_eq!(app.timeline.len(), 1);
        let message = &app.timeline.messages()[0];
        assert_eq!(message.text, "helo!");
        assert!(message.edited_at.is_some());
        assert!(!app.composer.is_editing());
    }

    #[tokio::test]
    async fn retargeted_edit_only_writes_the_last_target() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        send(&mut app, "one").await;
        send(&mut app, "two").await;

        // Start editing the older message, then retarget to the newer one
        // without saving.
        send(&mut app, "/edit 2").await;
        assert_eq!(app.composer.draft(), "one");
        type_text(&mut app, " unsaved").await;
        clear_draft(&mut app).await;
        send(&mut app, "/edit 1").await;
        assert_eq!(app.composer.draft(), "two");

        send(&mut app, "!").await;

        let texts: Vec<&str> = app
            .timeline
            .messages()
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["one", "two!"]);
    }

    #[tokio::test]
    async fn escape_cancels_an_edit_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        send(&mut app, "original").await;
        send(&mut app, "/edit").await;
        type_text(&mut app, " changed").await;
        press(&mut app, KeyCode::Esc).await;
        app.on_tick();

        assert_eq!(app.composer.draft(), "");
        assert_eq!(app.input_mode, InputMode::Insert);
        assert_eq!(app.timeline.messages()[0].text, "original");
    }

    #[tokio::test]
    async fn delete_asks_for_confirmation_first() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        send(&mut app, "oops").await;
        send(&mut app, "/delete").await;
        assert!(matches!(app.overlay, Overlay::ConfirmDelete { .. }));

        // Declining leaves the message alone.
        press(&mut app, KeyCode::Char('n')).await;
        app.on_tick();
        assert_eq!(app.timeline.len(), 1);

        send(&mut app, "/delete").await;
        press(&mut app, KeyCode::Char('y')).await;
        app.on_tick();
        assert!(app.timeline.is_empty());
    }

    #[tokio::test]
    async fn keystrokes_publish_typing_after_the_quiet_period() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        type_text(&mut app, "h").await;
        app.on_tick();
        assert!(store.documents(TYPING_STATUS).is_empty());

        tokio::time::sleep(Duration::from_millis(550)).await;
        app.on_tick();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let docs = store.documents(TYPING_STATUS);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, app.identity.user_id);
        assert_eq!(docs[0].fields["is_typing"], json!(true));
        assert_eq!(docs[0].fields["nickname"], json!("tester"));
    }

    #[tokio::test]
    async fn submit_clears_presence_immediately() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        type_text(&mut app, "done").await;
        press(&mut app, KeyCode::Enter).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let docs = store.documents(TYPING_STATUS);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].fields["is_typing"], json!(false));

        // The debounced request from the keystrokes was cancelled; nothing
        // flips the state back to typing afterwards.
        tokio::time::sleep(Duration::from_millis(550)).await;
        app.on_tick();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let docs = store.documents(TYPING_STATUS);
        assert_eq!(docs[0].fields["is_typing"], json!(false));
    }

    #[tokio::test]
    async fn roster_shows_fresh_typists_but_never_self() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        let own_id = app.identity.user_id.clone();

        store.seed(
            TYPING_STATUS,
            "alice",
            json!({ "is_typing": true, "nickname": "Alice" }),
            Utc::now(),
        );
        store.seed(
            TYPING_STATUS,
            &own_id,
            json!({ "is_typing": true, "nickname": "tester" }),
            Utc::now(),
        );
        store.seed(
            TYPING_STATUS,
            "sleepy",
            json!({ "is_typing": true, "nickname": "Sleepy" }),
            Utc::now() - chrono::Duration::seconds(5),
        );
        app.on_tick();

        assert_eq!(app.typing_names(), vec!["Alice"]);
    }

    #[tokio::test]
    async fn feed_errors_keep_the_materialized_view() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        send(&mut app, "still here").await;
        assert_eq!(app.timeline.len(), 1);

        store.emit_error(MESSAGES);
        app.on_tick();

        assert!(matches!(app.state, AppState::Error(_)));
        assert!(app.banner.as_deref().unwrap().contains("feed error"));
        assert_eq!(app.timeline.len(), 1);
        assert_eq!(app.timeline.messages()[0].text, "still here");
    }

    #[tokio::test]
    async fn emoji_picker_inserts_and_signals_typing() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        send(&mut app, "/emoji").await;
        assert_eq!(app.overlay, Overlay::EmojiPicker { selected: 0 });
        press(&mut app, KeyCode::Right).await;
        press(&mut app, KeyCode::Enter).await;

        assert_eq!(app.composer.draft(), EMOJI_PALETTE[1]);
        assert_eq!(app.overlay, Overlay::None);
    }

    #[tokio::test]
    async fn up_arrow_recalls_the_latest_own_message() {
        let store = Arc::new(MemoryStore::new());
        let mut app = app_with(store.clone(), "tester").await;
        press(&mut app, KeyCode::Char('i')).await;

        send(&mut app, "latest").await;
        press(&mut app, KeyCode::Up).await;

        assert!(app.composer.is_editing());
        assert_eq!(app.composer.draft(), "latest");
    }
}
