//! The server engine: one task owning all routing state.
//!
//! Every mutable table — connected clients, the active screen pointer,
//! clipboard slots, switch policy state — lives inside [`ServerEngine`] and
//! is touched only from its event loop. Listener tasks, capture callbacks,
//! and timers communicate with it exclusively through [`ServerEvent`]s, so
//! connection teardown is just removing an id from the tables.

pub mod input_filter;
pub mod switcher;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use edgehop_core::clipboard::{
    chunk_clipboard, ClipboardData, ClipboardId, CLIPBOARD_COUNT,
};
use edgehop_core::config::{FilterAction, FilterRule, ServerConfig, ToggleMode};
use edgehop_core::keys::{KeyModifierMask, ModifierId};
use edgehop_core::protocol::options::{
    OPT_HEARTBEAT, OPT_MODIFIER_MAP_FOR_ALT, OPT_MODIFIER_MAP_FOR_ALT_GR,
    OPT_MODIFIER_MAP_FOR_CONTROL, OPT_MODIFIER_MAP_FOR_META, OPT_MODIFIER_MAP_FOR_SHIFT,
    OPT_MODIFIER_MAP_FOR_SUPER, OPT_RELATIVE_MOUSE_MOVES, OPT_SCREENSAVER_SYNC,
};
use edgehop_core::protocol::{is_stale, Message, ProtocolVersion, ScreenInfo, SequenceCounter};
use edgehop_core::topology::{Direction, ScreenShape};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::net::client_proxy::{ClientProxy, ConnectionId};
use crate::screen::PrimaryScreen;
use input_filter::{FilterEvent, InputFilter};
use switcher::{resolve_target, SwitchCheck, SwitchContext, SwitchTarget, Switcher};

/// Grace given to a closed connection's socket to drain buffered writes.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Why a registration was refused; the listener maps these to close opcodes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// The name is not in the configured topology (`EUNK`).
    #[error("screen name {0:?} is not in the configuration")]
    NameUnknown(String),
    /// Another live connection already holds the name (`EBSY`).
    #[error("screen name {0:?} is already connected")]
    NameInUse(String),
}

/// Input captured on the primary screen, delivered in capture order.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryEvent {
    /// Absolute cursor position while the primary screen is active.
    Motion { x: i32, y: i32 },
    /// Raw motion deltas while a secondary screen is active.
    Delta { dx: i32, dy: i32 },
    KeyDown { key: u16, mask: u16, button: u16 },
    KeyUp { key: u16, mask: u16, button: u16 },
    KeyRepeat { key: u16, mask: u16, count: u16, button: u16 },
    MouseDown { button: u8 },
    MouseUp { button: u8 },
    Wheel { dx: i16, dy: i16 },
    /// The primary's local clipboard was grabbed by a local application.
    ClipboardGrabbed { id: ClipboardId },
    ScreenSaver { on: bool },
}

/// Everything that can wake the engine.
#[derive(Debug)]
pub enum ServerEvent {
    /// A handshaking connection asks to claim a screen name.
    Register {
        name: String,
        version: ProtocolVersion,
        outbound: mpsc::UnboundedSender<Message>,
        reply: oneshot::Sender<Result<ConnectionId, RegisterError>>,
    },
    /// The info exchange finished; the connection is now active.
    Ready { id: ConnectionId, info: ScreenInfo },
    /// A parsed message arrived from an active connection.
    Message { id: ConnectionId, message: Message },
    /// The connection's stream ended or failed.
    Disconnected { id: ConnectionId, reason: String },
    Primary(PrimaryEvent),
    /// An externally posted action (CLI, IPC), dispatched like a rule match.
    Action { action: FilterAction, activated: bool },
    /// Runtime reconfiguration.
    Reload(ServerConfig),
}

/// One fleet-wide clipboard slot.
#[derive(Debug, Default)]
struct ServerSlot {
    /// Canonical name of the owning screen.
    owner: String,
    sequence: u32,
    /// Marshalled contents, once the owner delivered them.
    data: Option<Vec<u8>>,
}

/// The server engine. Owns all state; runs on one task.
pub struct ServerEngine<P: PrimaryScreen> {
    config: ServerConfig,
    primary_name: String,
    primary: P,
    clients: HashMap<ConnectionId, ClientProxy>,
    /// Lowercase canonical name → connection.
    names: HashMap<String, ConnectionId>,
    /// `None` while the primary screen is active.
    active: Option<ConnectionId>,
    /// Cursor position in the active screen's pixel space.
    position: (i32, i32),
    enter_sequence: SequenceCounter,
    switcher: Switcher,
    slots: [ServerSlot; CLIPBOARD_COUNT],
    filter: InputFilter,
    /// Keyboard broadcast state: `Some(targets)` while on, empty = all.
    broadcast: Option<Vec<String>>,
    /// Last secondary the cursor visited, for the toggle action.
    last_secondary: Option<String>,
    /// Active screen and position remembered across a screensaver episode.
    saved_for_screensaver: Option<(Option<String>, (i32, i32))>,
    /// Modifier state from the most recent primary key event.
    current_mask: KeyModifierMask,
    /// Position to re-check when a deferred switch's deadline fires.
    pending_position: Option<((i32, i32), Instant)>,
}

impl<P: PrimaryScreen> ServerEngine<P> {
    pub fn new(config: ServerConfig, primary_name: String, primary: P) -> Self {
        let rules: Vec<FilterRule> = config.filter_rules.clone();
        let mut filter = InputFilter::new(rules);
        filter.enable(&primary);
        let center = primary.shape().center();
        let mut slots: [ServerSlot; CLIPBOARD_COUNT] = Default::default();
        for slot in &mut slots {
            slot.owner = primary_name.to_lowercase();
        }
        Self {
            config,
            primary_name,
            primary,
            clients: HashMap::new(),
            names: HashMap::new(),
            active: None,
            position: center,
            enter_sequence: SequenceCounter::new(),
            switcher: Switcher::new(),
            slots,
            filter,
            broadcast: None,
            last_secondary: None,
            saved_for_screensaver: None,
            current_mask: KeyModifierMask::default(),
            pending_position: None,
        }
    }

    /// The active screen's canonical name.
    pub fn active_screen(&self) -> &str {
        match self.active {
            None => &self.primary_name,
            Some(id) => self
                .clients
                .get(&id)
                .map(|p| p.name.as_str())
                .unwrap_or(&self.primary_name),
        }
    }

    pub fn is_locked_to_screen(&self) -> bool {
        self.switcher.is_locked()
    }

    pub fn current_enter_sequence(&self) -> u32 {
        self.enter_sequence.current()
    }

    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }

    /// Drives the engine until the event channel closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<ServerEvent>) {
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_event(event, Instant::now()),
                    None => break,
                },
                _ = tick.tick() => self.on_tick(Instant::now()),
            }
        }
        info!("engine event channel closed; shutting down");
    }

    /// Dispatches one event. Public so tests can drive the engine with an
    /// explicit clock.
    pub fn handle_event(&mut self, event: ServerEvent, now: Instant) {
        match event {
            ServerEvent::Register {
                name,
                version,
                outbound,
                reply,
            } => {
                let _ = reply.send(self.register(name, version, outbound, now));
            }
            ServerEvent::Ready { id, info } => self.client_ready(id, info),
            ServerEvent::Message { id, message } => self.client_message(id, message, now),
            ServerEvent::Disconnected { id, reason } => self.disconnect(id, &reason),
            ServerEvent::Primary(event) => self.primary_event(event, now),
            ServerEvent::Action { action, activated } => self.handle_action(&action, activated),
            ServerEvent::Reload(config) => self.reload(config),
        }
    }

    /// Periodic housekeeping: keep-alive sends, flatline checks, and
    /// deferred switch deadlines.
    pub fn on_tick(&mut self, now: Instant) {
        let mut dead: Vec<ConnectionId> = Vec::new();
        for (id, proxy) in &mut self.clients {
            if !proxy.ready {
                continue;
            }
            if proxy.keepalive.is_flatlined(now) {
                dead.push(*id);
                continue;
            }
            if now >= proxy.keepalive.next_send() {
                proxy.send(Message::KeepAlive);
                proxy.keepalive.record_sent(now);
            }
        }
        for id in dead {
            let name = self
                .clients
                .get(&id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            info!(screen = %name, "no frames within the keep-alive deadline; closing");
            self.disconnect(id, "keep-alive flatline");
        }

        if let Some((position, deadline)) = self.pending_position {
            if now >= deadline {
                self.pending_position = None;
                self.check_switch(position.0, position.1, now);
            }
        }
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    fn register(
        &mut self,
        name: String,
        version: ProtocolVersion,
        outbound: mpsc::UnboundedSender<Message>,
        now: Instant,
    ) -> Result<ConnectionId, RegisterError> {
        let canonical = self
            .config
            .topology
            .canonical_name(&name)
            .ok_or_else(|| RegisterError::NameUnknown(name.clone()))?
            .to_string();
        if canonical.eq_ignore_ascii_case(&self.primary_name) {
            return Err(RegisterError::NameInUse(name));
        }
        let key = canonical.to_lowercase();
        if self.names.contains_key(&key) {
            return Err(RegisterError::NameInUse(name));
        }
        let mut proxy = ClientProxy::new(canonical, version, outbound, now);
        if let Some(heartbeat) = self.config.options.heartbeat {
            proxy.keepalive.set_rate(heartbeat);
        }
        let id = proxy.id;
        self.names.insert(key, id);
        self.clients.insert(id, proxy);
        Ok(id)
    }

    fn client_ready(&mut self, id: ConnectionId, info: ScreenInfo) {
        let Some(proxy) = self.clients.get_mut(&id) else {
            return;
        };
        proxy.info = info;
        proxy.ready = true;
        let name = proxy.name.clone();
        info!(screen = %name, width = info.width, height = info.height, "client active");

        self.send_options(id);

        // Screen-connected rules fire synchronously, like any other trigger.
        let matches: Vec<(FilterRule, bool)> = self
            .filter
            .evaluate(&FilterEvent::ScreenConnected { name: name.clone() })
            .into_iter()
            .map(|m| (m.rule.clone(), m.activated))
            .collect();
        for (rule, activated) in matches {
            self.dispatch_rule(&rule, activated);
        }
    }

    /// Pushes the per-screen option vector (`DSOP`) to a client.
    fn send_options(&mut self, id: ConnectionId) {
        let Some(proxy) = self.clients.get(&id) else {
            return;
        };
        let mut options: Vec<(u32, u32)> = Vec::new();
        if let Some(heartbeat) = self.config.options.heartbeat {
            options.push((OPT_HEARTBEAT, heartbeat.as_millis() as u32));
        }
        options.push((
            OPT_SCREENSAVER_SYNC,
            u32::from(self.config.options.screensaver_sync),
        ));
        if self.config.options.relative_mouse_moves {
            options.push((OPT_RELATIVE_MOUSE_MOVES, 1));
        }
        if let Some(screen_options) = self.config.topology.options(&proxy.name) {
            for (from, to) in &screen_options.modifier_remaps {
                options.push((modifier_option(*from), *to as u32));
            }
        }
        if !options.is_empty() {
            proxy.send(Message::SetOptions { options });
        }
    }

    fn disconnect(&mut self, id: ConnectionId, reason: &str) {
        let Some(proxy) = self.clients.remove(&id) else {
            return;
        };
        self.names.remove(&proxy.name.to_lowercase());
        info!(screen = %proxy.name, reason, "client disconnected");

        if self.active == Some(id) {
            // The active screen vanished: input falls back to the primary.
            self.active = None;
            let center = self.primary.shape().center();
            self.position = center;
            self.primary.warp_cursor(center.0, center.1);
            self.switcher.reset();
        }
    }

    fn reload(&mut self, config: ServerConfig) {
        if let Err(e) = config.require_screen(&self.primary_name) {
            warn!("rejecting reload: {e}");
            return;
        }
        // Drop connections whose screens left the topology.
        let orphaned: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|p| !config.topology.contains(&p.name))
            .map(|p| p.id)
            .collect();
        self.config = config;
        for id in orphaned {
            if let Some(proxy) = self.clients.get(&id) {
                proxy.send(Message::Close);
            }
            self.disconnect(id, "screen removed from configuration");
        }
        self.filter.disable(&self.primary);
        self.filter = InputFilter::new(self.config.filter_rules.clone());
        self.filter.enable(&self.primary);

        // Surviving clients get their options reset and re-sent.
        let ids: Vec<ConnectionId> = self.clients.keys().copied().collect();
        for id in ids {
            if let Some(proxy) = self.clients.get(&id) {
                proxy.send(Message::ResetOptions);
            }
            self.send_options(id);
        }
        info!("configuration reloaded");
    }

    // ── Inbound client messages ───────────────────────────────────────────────

    fn client_message(&mut self, id: ConnectionId, message: Message, now: Instant) {
        if let Some(proxy) = self.clients.get_mut(&id) {
            // Any frame is proof of life.
            proxy.keepalive.record_inbound(now);
        } else {
            return;
        }

        match message {
            Message::KeepAlive | Message::Noop => {}
            Message::Close => self.disconnect(id, "peer closed"),
            Message::GrabClipboard { id: slot, sequence } => {
                let name = self.clients[&id].name.clone();
                self.grab_clipboard(&name, slot, sequence);
            }
            Message::ClipboardData {
                id: slot,
                sequence,
                mark,
                data,
            } => self.clipboard_data(id, slot, sequence, mark, &data),
            Message::Info(info) => self.info_changed(id, info),
            Message::FileTransfer { .. } | Message::DragInfo { .. } => {
                // Framing-compatible traffic with no local consumer.
                debug!("ignoring file-transfer traffic");
            }
            Message::ErrorBad | Message::ErrorBusy | Message::ErrorUnknown => {
                let name = self.clients[&id].name.clone();
                warn!(screen = %name, opcode = message.name(), "client reported an error");
                self.disconnect(id, "client error");
            }
            other => {
                let name = self.clients[&id].name.clone();
                warn!(screen = %name, opcode = other.name(), "unexpected message from client");
                if let Some(proxy) = self.clients.get(&id) {
                    proxy.send(Message::ErrorBad);
                }
                self.disconnect(id, "protocol error");
            }
        }
    }

    fn info_changed(&mut self, id: ConnectionId, info: ScreenInfo) {
        let Some(proxy) = self.clients.get_mut(&id) else {
            return;
        };
        proxy.info = info;
        debug!(screen = %proxy.name, width = info.width, height = info.height, "shape updated");
        if self.active == Some(id) {
            let shape = proxy.shape();
            self.position = shape.clamp(self.position.0, self.position.1);
        }
    }

    // ── Clipboard replication ─────────────────────────────────────────────────

    /// A screen grabbed a clipboard slot.
    fn grab_clipboard(&mut self, owner: &str, slot_id: ClipboardId, sequence: u32) {
        let slot = &mut self.slots[slot_id.index()];
        let newer = sequence != slot.sequence && !is_stale(slot.sequence, sequence);
        if !newer && !owner.eq_ignore_ascii_case(&slot.owner) {
            debug!(slot = ?slot_id, sequence, "stale clipboard grab ignored");
            return;
        }
        slot.owner = owner.to_lowercase();
        if newer {
            slot.sequence = sequence;
        }
        slot.data = None;

        for proxy in self.clients.values_mut() {
            let state = &mut proxy.clipboard[slot_id.index()];
            let is_owner = proxy.name.eq_ignore_ascii_case(owner);
            state.own = is_owner;
            state.sent = false;
            state.last_sequence = sequence;
            if !is_owner {
                proxy.send(Message::GrabClipboard {
                    id: slot_id,
                    sequence,
                });
            }
        }
    }

    /// One `DCLP` chunk from the slot's owner.
    fn clipboard_data(
        &mut self,
        id: ConnectionId,
        slot_id: ClipboardId,
        sequence: u32,
        mark: edgehop_core::clipboard::ChunkMark,
        data: &[u8],
    ) {
        let Some(proxy) = self.clients.get_mut(&id) else {
            return;
        };
        let name = proxy.name.clone();
        match proxy.assemblers[slot_id.index()].accept(mark, data) {
            Ok(Some(blob)) => {
                let slot = &mut self.slots[slot_id.index()];
                if is_stale(slot.sequence, sequence) || !slot.owner.eq_ignore_ascii_case(&name) {
                    debug!(slot = ?slot_id, "clipboard data from a non-owner ignored");
                    return;
                }
                slot.data = Some(blob.clone());
                // While the primary is active its local clipboard mirrors the
                // fleet clipboard immediately.
                if self.active.is_none() {
                    match ClipboardData::unmarshal(&blob) {
                        Ok(contents) => self.primary.set_clipboard(slot_id, &contents),
                        Err(e) => warn!(slot = ?slot_id, "bad clipboard payload: {e}"),
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(screen = %name, "clipboard transfer failed: {e}");
            }
        }
    }

    /// Before the cursor leaves the primary, refresh slots the primary owns
    /// so the destination receives current contents.
    fn refresh_primary_clipboards(&mut self) {
        for slot_id in ClipboardId::all() {
            let owner_is_primary = self.slots[slot_id.index()]
                .owner
                .eq_ignore_ascii_case(&self.primary_name);
            if !owner_is_primary {
                continue;
            }
            let Some(contents) = self.primary.clipboard(slot_id) else {
                continue;
            };
            let marshalled = contents.marshal();
            let slot = &mut self.slots[slot_id.index()];
            if slot.data.as_deref() == Some(marshalled.as_slice()) {
                continue;
            }
            let sequence = slot.sequence.wrapping_add(1);
            slot.sequence = sequence;
            slot.data = Some(marshalled);
            for proxy in self.clients.values_mut() {
                proxy.clipboard[slot_id.index()].own = false;
                proxy.clipboard[slot_id.index()].sent = false;
                proxy.send(Message::GrabClipboard {
                    id: slot_id,
                    sequence,
                });
            }
        }
    }

    /// Pushes any unsent slots to the newly active screen, respecting the
    /// sharing policy and size ceiling.
    fn push_clipboards_to(&mut self, id: ConnectionId) {
        if !self.config.options.clipboard_sharing {
            return;
        }
        let limit = self.config.options.clipboard_sharing_size;
        for slot_id in ClipboardId::all() {
            let (sequence, data) = {
                let slot = &self.slots[slot_id.index()];
                let Some(proxy) = self.clients.get(&id) else {
                    return;
                };
                if proxy.clipboard[slot_id.index()].sent
                    || slot.owner.eq_ignore_ascii_case(&proxy.name)
                {
                    continue;
                }
                let Some(data) = slot.data.clone() else {
                    continue;
                };
                (slot.sequence, data)
            };
            if data.is_empty() || data.len() > limit {
                warn!(
                    slot = ?slot_id,
                    size = data.len(),
                    "skipping clipboard transfer outside the size policy"
                );
                continue;
            }
            let Some(proxy) = self.clients.get_mut(&id) else {
                return;
            };
            for message in chunk_clipboard(slot_id, sequence, &data) {
                proxy.send(message);
            }
            proxy.clipboard[slot_id.index()].sent = true;
        }
    }

    // ── Primary input ─────────────────────────────────────────────────────────

    fn primary_event(&mut self, event: PrimaryEvent, now: Instant) {
        match event {
            PrimaryEvent::Motion { x, y } => {
                if self.active.is_none() {
                    self.position = (x, y);
                    self.check_switch(x, y, now);
                }
            }
            PrimaryEvent::Delta { dx, dy } => self.secondary_motion(dx, dy, now),
            PrimaryEvent::KeyDown { key, mask, button } => {
                self.current_mask = KeyModifierMask(mask);
                let matches = self.collect_matches(&FilterEvent::KeyDown {
                    key,
                    mask: KeyModifierMask(mask),
                });
                if !matches.is_empty() {
                    for (rule, activated) in matches {
                        self.dispatch_rule(&rule, activated);
                    }
                    return;
                }
                self.forward_key(Message::KeyDown { key, mask, button });
            }
            PrimaryEvent::KeyUp { key, mask, button } => {
                self.current_mask = KeyModifierMask(mask);
                let matches = self.collect_matches(&FilterEvent::KeyUp {
                    key,
                    mask: KeyModifierMask(mask),
                });
                if !matches.is_empty() {
                    for (rule, activated) in matches {
                        self.dispatch_rule(&rule, activated);
                    }
                    return;
                }
                self.forward_key(Message::KeyUp { key, mask, button });
            }
            PrimaryEvent::KeyRepeat {
                key,
                mask,
                count,
                button,
            } => {
                self.forward_key(Message::KeyRepeat {
                    key,
                    mask,
                    count,
                    button,
                });
            }
            PrimaryEvent::MouseDown { button } => {
                let matches = self.collect_matches(&FilterEvent::MouseDown {
                    button,
                    mask: self.current_mask,
                });
                if !matches.is_empty() {
                    for (rule, activated) in matches {
                        self.dispatch_rule(&rule, activated);
                    }
                    return;
                }
                self.send_to_active(Message::MouseDown { button });
            }
            PrimaryEvent::MouseUp { button } => {
                let matches = self.collect_matches(&FilterEvent::MouseUp {
                    button,
                    mask: self.current_mask,
                });
                if !matches.is_empty() {
                    for (rule, activated) in matches {
                        self.dispatch_rule(&rule, activated);
                    }
                    return;
                }
                self.send_to_active(Message::MouseUp { button });
            }
            PrimaryEvent::Wheel { dx, dy } => {
                self.send_to_active(Message::MouseWheel { dx, dy });
            }
            PrimaryEvent::ClipboardGrabbed { id } => {
                let sequence = self.slots[id.index()].sequence.wrapping_add(1);
                let primary = self.primary_name.clone();
                self.grab_clipboard(&primary, id, sequence);
                if let Some(contents) = self.primary.clipboard(id) {
                    self.slots[id.index()].data = Some(contents.marshal());
                }
            }
            PrimaryEvent::ScreenSaver { on } => self.screensaver(on),
        }
    }

    fn collect_matches(&self, event: &FilterEvent) -> Vec<(FilterRule, bool)> {
        self.filter
            .evaluate(event)
            .into_iter()
            .map(|m| (m.rule.clone(), m.activated))
            .collect()
    }

    /// Motion while a secondary screen is active: accumulate, clamp, check
    /// for a switch, and deliver.
    fn secondary_motion(&mut self, dx: i32, dy: i32, now: Instant) {
        let Some(id) = self.active else {
            return;
        };
        let Some(proxy) = self.clients.get(&id) else {
            return;
        };

        // Locked to a secondary in relative mode: ship raw deltas so games
        // that warp the pointer behave.
        if self.switcher.is_locked() && self.config.options.relative_mouse_moves {
            proxy.send(Message::MouseRelMove {
                dx: dx as i16,
                dy: dy as i16,
            });
            return;
        }

        let shape = proxy.shape();
        let (x, y) = shape.clamp(self.position.0 + dx, self.position.1 + dy);
        self.position = (x, y);

        if !self.check_switch(x, y, now) {
            if let Some(proxy) = self.clients.get(&id) {
                proxy.send(Message::MouseMove {
                    x: x as i16,
                    y: y as i16,
                });
            }
        }
    }

    /// Runs the switch policy for the current position. Returns true when a
    /// switch happened.
    fn check_switch(&mut self, x: i32, y: i32, now: Instant) -> bool {
        // Scroll-lock pins the cursor to the active screen.
        if self
            .primary
            .toggle_mask()
            .contains(KeyModifierMask::SCROLL_LOCK)
        {
            return false;
        }
        let active_name = self.active_screen().to_string();
        let shape = match self.active {
            None => self.primary.shape(),
            Some(id) => match self.clients.get(&id) {
                Some(proxy) => proxy.shape(),
                None => return false,
            },
        };

        let live: HashMap<String, ScreenShape> = self.live_shapes();
        let resolve = move |name: &str| live.get(&name.to_lowercase()).copied();
        let ctx = SwitchContext {
            topology: &self.config.topology,
            options: &self.config.options,
            active: &active_name,
            shape,
            resolve: &resolve,
        };

        match self.switcher.check(&ctx, x, y, self.current_mask, now) {
            SwitchCheck::Stay => false,
            SwitchCheck::Pending { deadline } => {
                self.pending_position = Some(((x, y), deadline));
                false
            }
            SwitchCheck::Switch(target) => {
                self.pending_position = None;
                self.switch_to_target(&target, false);
                true
            }
        }
    }

    fn live_shapes(&self) -> HashMap<String, ScreenShape> {
        let mut map: HashMap<String, ScreenShape> = self
            .clients
            .values()
            .filter(|p| p.ready)
            .map(|p| (p.name.to_lowercase(), p.shape()))
            .collect();
        map.insert(self.primary_name.to_lowercase(), self.primary.shape());
        map
    }

    // ── Switch execution ──────────────────────────────────────────────────────

    fn switch_to_target(&mut self, target: &SwitchTarget, for_screensaver: bool) {
        self.switch_to(&target.screen, target.x, target.y, for_screensaver);
    }

    /// Leaves the active screen and enters `screen` at `(x, y)`.
    pub fn switch_to(&mut self, screen: &str, x: i32, y: i32, for_screensaver: bool) {
        let Some(destination) = self.config.topology.canonical_name(screen).map(String::from)
        else {
            warn!(screen, "switch to unknown screen ignored");
            return;
        };
        if destination.eq_ignore_ascii_case(self.active_screen()) {
            return;
        }

        // Resolve the destination before anything leaves the old screen.
        let target = if destination.eq_ignore_ascii_case(&self.primary_name) {
            None
        } else {
            match self.names.get(&destination.to_lowercase()) {
                Some(&id) if self.clients[&id].ready => Some(id),
                _ => {
                    warn!(screen = %destination, "switch to unavailable screen ignored");
                    return;
                }
            }
        };

        // Leave the old screen first.
        match self.active {
            None => self.refresh_primary_clipboards(),
            Some(id) => {
                if let Some(proxy) = self.clients.get(&id) {
                    proxy.send(Message::Leave);
                    self.last_secondary = Some(proxy.name.clone());
                }
            }
        }

        let Some(id) = target else {
            self.active = None;
            self.position = (x, y);
            self.primary.warp_cursor(x, y);
            self.apply_owned_clipboards_to_primary();
            self.switcher.reset();
            debug!(x, y, "entered primary screen");
            return;
        };
        let sequence = self.enter_sequence.advance();
        let mask = self.primary.toggle_mask();
        {
            let proxy = &self.clients[&id];
            proxy.send(Message::Enter {
                x: x as i16,
                y: y as i16,
                sequence,
                mask: mask.0,
                for_screensaver: proxy
                    .version
                    .has_screensaver_byte()
                    .then_some(for_screensaver),
            });
        }
        self.active = Some(id);
        self.position = (x, y);
        // Park the physical cursor mid-primary while input flows elsewhere.
        let center = self.primary.shape().center();
        self.primary.warp_cursor(center.0, center.1);
        self.push_clipboards_to(id);
        self.switcher.reset();
        debug!(screen = %destination, x, y, sequence, "entered secondary screen");
    }

    /// When returning to the primary, write fleet-owned slots into the local
    /// clipboard.
    fn apply_owned_clipboards_to_primary(&mut self) {
        for slot_id in ClipboardId::all() {
            let slot = &self.slots[slot_id.index()];
            if slot.owner.eq_ignore_ascii_case(&self.primary_name) {
                continue;
            }
            if let Some(data) = &slot.data {
                match ClipboardData::unmarshal(data) {
                    Ok(contents) => self.primary.set_clipboard(slot_id, &contents),
                    Err(e) => warn!(slot = ?slot_id, "bad clipboard payload: {e}"),
                }
            }
        }
    }

    // ── Actions ───────────────────────────────────────────────────────────────

    fn dispatch_rule(&mut self, rule: &FilterRule, activated: bool) {
        let actions = if activated {
            &rule.activate
        } else {
            &rule.deactivate
        };
        for action in actions {
            self.handle_action(action, activated);
        }
    }

    /// Applies one engine-level action, immediately.
    pub fn handle_action(&mut self, action: &FilterAction, activated: bool) {
        match action {
            FilterAction::LockCursorToScreen(mode) => {
                if activated {
                    let locked = mode.apply(self.switcher.is_locked());
                    self.switcher.set_locked(locked);
                    info!(locked, "cursor lock changed");
                }
            }
            FilterAction::SwitchToScreen(name) => {
                if activated {
                    self.switch_to_center(name.clone());
                }
            }
            FilterAction::ToggleScreen => {
                if activated {
                    match self.active {
                        Some(_) => {
                            let center = self.primary.shape().center();
                            let primary = self.primary_name.clone();
                            self.switch_to(&primary, center.0, center.1, false);
                        }
                        None => {
                            if let Some(last) = self.last_secondary.clone() {
                                self.switch_to_center(last);
                            }
                        }
                    }
                }
            }
            FilterAction::SwitchInDirection(direction) => {
                if activated {
                    self.switch_in_direction(*direction);
                }
            }
            FilterAction::KeyboardBroadcast { mode, screens } => {
                if activated {
                    let on = mode.apply(self.broadcast.is_some());
                    self.broadcast = on.then(|| screens.clone());
                    info!(on, "keyboard broadcast changed");
                }
            }
            FilterAction::Keystroke {
                key,
                mask,
                screens,
                press,
            } => {
                let send_press = activated && press != &Some(false);
                let send_release = !activated && press != &Some(true);
                if send_press {
                    self.send_to_screens(
                        screens,
                        Message::KeyDown {
                            key: *key,
                            mask: mask.0,
                            button: 0,
                        },
                    );
                } else if send_release {
                    self.send_to_screens(
                        screens,
                        Message::KeyUp {
                            key: *key,
                            mask: mask.0,
                            button: 0,
                        },
                    );
                }
            }
            FilterAction::MouseButton { button, press } => {
                let send_press = activated && press != &Some(false);
                let send_release = !activated && press != &Some(true);
                if send_press {
                    self.send_to_active(Message::MouseDown { button: *button });
                } else if send_release {
                    self.send_to_active(Message::MouseUp { button: *button });
                }
            }
        }
    }

    fn switch_to_center(&mut self, name: String) {
        let Some(&id) = self
            .config
            .topology
            .canonical_name(&name)
            .and_then(|c| self.names.get(&c.to_lowercase()))
        else {
            if name.eq_ignore_ascii_case(&self.primary_name) {
                let center = self.primary.shape().center();
                let primary = self.primary_name.clone();
                self.switch_to(&primary, center.0, center.1, false);
            } else {
                warn!(screen = %name, "switch action targets a disconnected screen");
            }
            return;
        };
        let center = self.clients[&id].shape().center();
        let name = self.clients[&id].name.clone();
        self.switch_to(&name, center.0, center.1, false);
    }

    fn switch_in_direction(&mut self, direction: Direction) {
        let active_name = self.active_screen().to_string();
        let shape = match self.active {
            None => self.primary.shape(),
            Some(id) => match self.clients.get(&id) {
                Some(p) => p.shape(),
                None => return,
            },
        };
        let live = self.live_shapes();
        let resolve = move |name: &str| live.get(&name.to_lowercase()).copied();
        let ctx = SwitchContext {
            topology: &self.config.topology,
            options: &self.config.options,
            active: &active_name,
            shape,
            resolve: &resolve,
        };
        if let Some(target) = resolve_target(&ctx, direction, self.position.0, self.position.1) {
            self.switch_to_target(&target, false);
        }
    }

    // ── Screensaver ───────────────────────────────────────────────────────────

    fn screensaver(&mut self, on: bool) {
        if on {
            let saved_screen = self.active.and_then(|id| {
                self.clients.get(&id).map(|p| p.name.clone())
            });
            self.saved_for_screensaver = Some((saved_screen, self.position));
            if self.active.is_some() {
                let center = self.primary.shape().center();
                let primary = self.primary_name.clone();
                self.switch_to(&primary, center.0, center.1, true);
            }
        }
        if self.config.options.screensaver_sync {
            for proxy in self.clients.values() {
                proxy.send(Message::ScreenSaver { on });
            }
        }
        if !on {
            // Shapes may have changed while the fleet was detached.
            for proxy in self.clients.values() {
                proxy.send(Message::QueryInfo);
            }
            if let Some((screen, (x, y))) = self.saved_for_screensaver.take() {
                if let Some(screen) = screen {
                    // The screen's shape may have changed while detached.
                    let clamped = self
                        .names
                        .get(&screen.to_lowercase())
                        .and_then(|id| self.clients.get(id))
                        .map(|p| p.shape().clamp(x, y));
                    if let Some((x, y)) = clamped {
                        self.switch_to(&screen, x, y, true);
                    }
                }
            }
        }
    }

    // ── Delivery helpers ──────────────────────────────────────────────────────

    fn forward_key(&mut self, message: Message) {
        if let Some(targets) = self.broadcast.clone() {
            self.send_to_screens(&targets, message);
            return;
        }
        self.send_to_active(message);
    }

    fn send_to_active(&self, message: Message) {
        if let Some(id) = self.active {
            if let Some(proxy) = self.clients.get(&id) {
                proxy.send(message);
            }
        }
    }

    /// Sends to the named screens; an empty list means every ready client.
    fn send_to_screens(&self, screens: &[String], message: Message) {
        if screens.is_empty() {
            for proxy in self.clients.values().filter(|p| p.ready) {
                proxy.send(message.clone());
            }
            return;
        }
        for name in screens {
            if let Some(proxy) = self
                .names
                .get(&name.to_lowercase())
                .and_then(|id| self.clients.get(id))
            {
                proxy.send(message.clone());
            }
        }
    }
}

/// The `DSOP` option id carrying a remap of `from`.
fn modifier_option(from: ModifierId) -> u32 {
    match from {
        ModifierId::Shift => OPT_MODIFIER_MAP_FOR_SHIFT,
        ModifierId::Control => OPT_MODIFIER_MAP_FOR_CONTROL,
        ModifierId::Alt => OPT_MODIFIER_MAP_FOR_ALT,
        ModifierId::AltGr => OPT_MODIFIER_MAP_FOR_ALT_GR,
        ModifierId::Meta => OPT_MODIFIER_MAP_FOR_META,
        ModifierId::Super => OPT_MODIFIER_MAP_FOR_SUPER,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::MockPrimaryScreen;
    use edgehop_core::clipboard::ChunkMark;
    use edgehop_core::config::parse_config;
    use edgehop_core::protocol::PROTOCOL_VERSION;

    const TWO_CLIENT_CONFIG: &str = r#"
section: screens
  primary:
  left:
  right:
end
section: links
  primary:
    right = right
    left = left
  right:
    left = primary
  left:
    right = primary
end
"#;

    struct Fixture {
        engine: ServerEngine<MockPrimaryScreen>,
        now: Instant,
    }

    impl Fixture {
        fn new(config_text: &str) -> Self {
            let config = parse_config(config_text).unwrap();
            let engine = ServerEngine::new(
                config,
                "primary".to_string(),
                MockPrimaryScreen::new(1920, 1080),
            );
            Self {
                engine,
                now: Instant::now(),
            }
        }

        fn connect(
            &mut self,
            name: &str,
            width: u16,
            height: u16,
        ) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = self
                .engine
                .register(name.to_string(), PROTOCOL_VERSION, tx, self.now)
                .expect("register failed");
            self.engine.client_ready(
                id,
                ScreenInfo {
                    x: 0,
                    y: 0,
                    width,
                    height,
                    cursor_x: 0,
                    cursor_y: 0,
                },
            );
            (id, rx)
        }

        fn motion(&mut self, x: i32, y: i32) {
            self.engine
                .primary_event(PrimaryEvent::Motion { x, y }, self.now);
        }

        fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
            let mut out = Vec::new();
            while let Ok(msg) = rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    // ── Registration ─────────────────────────────────────────────────────────

    #[test]
    fn test_register_unknown_name_is_refused() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = fx
            .engine
            .register("ghost".to_string(), PROTOCOL_VERSION, tx, fx.now);
        assert_eq!(result, Err(RegisterError::NameUnknown("ghost".to_string())));
    }

    #[test]
    fn test_register_duplicate_name_is_refused() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let _first = fx.connect("right", 2560, 1440);
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = fx
            .engine
            .register("right".to_string(), PROTOCOL_VERSION, tx, fx.now);
        assert_eq!(result, Err(RegisterError::NameInUse("right".to_string())));
    }

    #[test]
    fn test_register_accepts_alias_case_insensitively() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = fx
            .engine
            .register("RIGHT".to_string(), PROTOCOL_VERSION, tx, fx.now);
        assert!(result.is_ok());
    }

    #[test]
    fn test_primary_name_cannot_be_claimed() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = fx
            .engine
            .register("primary".to_string(), PROTOCOL_VERSION, tx, fx.now);
        assert_eq!(
            result,
            Err(RegisterError::NameInUse("primary".to_string()))
        );
    }

    // ── Switching ────────────────────────────────────────────────────────────

    #[test]
    fn test_motion_into_right_zone_switches_with_leave_then_enter() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut rx);

        fx.motion(1919, 540);

        let messages = Fixture::drain(&mut rx);
        assert_eq!(messages.len(), 1);
        let Message::Enter {
            x,
            y,
            sequence,
            mask,
            for_screensaver,
        } = &messages[0]
        else {
            panic!("expected enter, got {:?}", messages[0]);
        };
        assert_eq!(*x, 1);
        assert_eq!(*y, 720);
        assert_eq!(*sequence, 1);
        assert_eq!(*mask, 0);
        assert_eq!(*for_screensaver, None);
        assert_eq!(fx.engine.active_screen(), "right");
    }

    #[test]
    fn test_enter_sequence_increments_per_switch() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_right, mut right_rx) = fx.connect("right", 1920, 1080);
        let (_left, mut left_rx) = fx.connect("left", 1920, 1080);
        Fixture::drain(&mut right_rx);
        Fixture::drain(&mut left_rx);

        // primary -> right
        fx.motion(1919, 540);
        // right -> primary (cross right's left edge)
        fx.engine
            .primary_event(PrimaryEvent::Delta { dx: -2000, dy: 0 }, fx.now);
        // primary -> left
        fx.motion(0, 540);

        let right_msgs = Fixture::drain(&mut right_rx);
        let left_msgs = Fixture::drain(&mut left_rx);
        let first_enter = right_msgs
            .iter()
            .find_map(|m| match m {
                Message::Enter { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .unwrap();
        let second_enter = left_msgs
            .iter()
            .find_map(|m| match m {
                Message::Enter { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .unwrap();
        assert_eq!(first_enter, 1);
        assert_eq!(second_enter, 2);
        // The departing secondary received a leave before the new enter.
        assert!(right_msgs.contains(&Message::Leave));
    }

    #[test]
    fn test_motion_on_secondary_is_forwarded_as_absolute_moves() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        fx.motion(1919, 540);
        Fixture::drain(&mut rx);

        fx.engine
            .primary_event(PrimaryEvent::Delta { dx: 10, dy: -5 }, fx.now);
        let messages = Fixture::drain(&mut rx);
        assert_eq!(
            messages,
            vec![Message::MouseMove { x: 11, y: 715 }]
        );
    }

    #[test]
    fn test_locked_screen_swallows_zone_touches() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut rx);

        fx.engine.handle_action(
            &FilterAction::LockCursorToScreen(ToggleMode::On),
            true,
        );
        fx.motion(1919, 540);
        fx.motion(1919, 600);

        assert!(Fixture::drain(&mut rx).is_empty());
        assert_eq!(fx.engine.active_screen(), "primary");
    }

    #[test]
    fn test_scroll_lock_pins_the_cursor() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut rx);

        *fx.engine.primary.toggle_mask.lock().unwrap() =
            KeyModifierMask(KeyModifierMask::SCROLL_LOCK);
        fx.motion(1919, 540);
        assert_eq!(fx.engine.active_screen(), "primary");
        assert!(Fixture::drain(&mut rx).is_empty());

        *fx.engine.primary.toggle_mask.lock().unwrap() = KeyModifierMask::default();
        fx.motion(1919, 540);
        assert_eq!(fx.engine.active_screen(), "right");
    }

    #[test]
    fn test_disconnect_of_active_screen_falls_back_to_primary() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (id, mut rx) = fx.connect("right", 2560, 1440);
        fx.motion(1919, 540);
        Fixture::drain(&mut rx);
        assert_eq!(fx.engine.active_screen(), "right");

        fx.engine.disconnect(id, "test");
        assert_eq!(fx.engine.active_screen(), "primary");
        assert_eq!(fx.engine.connected_count(), 0);
    }

    // ── Input forwarding ─────────────────────────────────────────────────────

    #[test]
    fn test_keys_go_to_active_secondary_only() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_right, mut right_rx) = fx.connect("right", 2560, 1440);
        let (_left, mut left_rx) = fx.connect("left", 1920, 1080);
        fx.motion(1919, 540);
        Fixture::drain(&mut right_rx);
        Fixture::drain(&mut left_rx);

        fx.engine.primary_event(
            PrimaryEvent::KeyDown {
                key: 0x61,
                mask: 0,
                button: 0x1E,
            },
            fx.now,
        );

        assert_eq!(
            Fixture::drain(&mut right_rx),
            vec![Message::KeyDown {
                key: 0x61,
                mask: 0,
                button: 0x1E
            }]
        );
        assert!(Fixture::drain(&mut left_rx).is_empty());
    }

    #[test]
    fn test_keyboard_broadcast_sends_to_every_ready_client() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_right, mut right_rx) = fx.connect("right", 2560, 1440);
        let (_left, mut left_rx) = fx.connect("left", 1920, 1080);
        Fixture::drain(&mut right_rx);
        Fixture::drain(&mut left_rx);

        fx.engine.handle_action(
            &FilterAction::KeyboardBroadcast {
                mode: ToggleMode::On,
                screens: Vec::new(),
            },
            true,
        );
        fx.engine.primary_event(
            PrimaryEvent::KeyDown {
                key: 0x62,
                mask: 0,
                button: 0x30,
            },
            fx.now,
        );

        assert_eq!(Fixture::drain(&mut right_rx).len(), 1);
        assert_eq!(Fixture::drain(&mut left_rx).len(), 1);
    }

    // ── Clipboard replication ────────────────────────────────────────────────

    #[test]
    fn test_grab_forwards_to_other_connections_and_tracks_owner() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (left_id, mut left_rx) = fx.connect("left", 1920, 1080);
        let (_right, mut right_rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut left_rx);
        Fixture::drain(&mut right_rx);

        fx.engine.client_message(
            left_id,
            Message::GrabClipboard {
                id: ClipboardId::General,
                sequence: 7,
            },
            fx.now,
        );

        // The grabber does not hear its own grab; the other client does.
        assert!(Fixture::drain(&mut left_rx).is_empty());
        assert_eq!(
            Fixture::drain(&mut right_rx),
            vec![Message::GrabClipboard {
                id: ClipboardId::General,
                sequence: 7
            }]
        );
    }

    #[test]
    fn test_stale_grab_is_ignored() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (left_id, mut left_rx) = fx.connect("left", 1920, 1080);
        let (right_id, mut right_rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut left_rx);
        Fixture::drain(&mut right_rx);

        fx.engine.client_message(
            left_id,
            Message::GrabClipboard {
                id: ClipboardId::General,
                sequence: 7,
            },
            fx.now,
        );
        Fixture::drain(&mut right_rx);

        // An older grab from the other client must not steal ownership.
        fx.engine.client_message(
            right_id,
            Message::GrabClipboard {
                id: ClipboardId::General,
                sequence: 3,
            },
            fx.now,
        );
        assert!(Fixture::drain(&mut left_rx).is_empty());
    }

    #[test]
    fn test_clipboard_pushed_to_newly_entered_screen() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (left_id, mut left_rx) = fx.connect("left", 1920, 1080);
        let (_right, mut right_rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut left_rx);
        Fixture::drain(&mut right_rx);

        // Left grabs and delivers "hello".
        fx.engine.client_message(
            left_id,
            Message::GrabClipboard {
                id: ClipboardId::General,
                sequence: 7,
            },
            fx.now,
        );
        let marshalled = ClipboardData::from_text("hello").marshal();
        for message in chunk_clipboard(ClipboardId::General, 7, &marshalled) {
            let Message::ClipboardData {
                id: slot,
                sequence,
                mark,
                data,
            } = message
            else {
                unreachable!();
            };
            fx.engine.client_message(
                left_id,
                Message::ClipboardData {
                    id: slot,
                    sequence,
                    mark,
                    data,
                },
                fx.now,
            );
        }

        // Switch to the right screen: it receives the start/data/end chunks.
        fx.motion(1919, 540);
        let messages = Fixture::drain(&mut right_rx);
        let chunks: Vec<&Message> = messages
            .iter()
            .filter(|m| matches!(m, Message::ClipboardData { .. }))
            .collect();
        assert_eq!(chunks.len(), 3);
        let Message::ClipboardData { mark, data, .. } = chunks[1] else {
            unreachable!();
        };
        assert_eq!(*mark, ChunkMark::Data);
        let restored = ClipboardData::unmarshal(data).unwrap();
        assert_eq!(restored, ClipboardData::from_text("hello"));

        // A second visit must not re-send an unchanged slot.
        fx.engine
            .primary_event(PrimaryEvent::Delta { dx: -3000, dy: 0 }, fx.now);
        Fixture::drain(&mut right_rx);
        fx.motion(1919, 540);
        let again = Fixture::drain(&mut right_rx);
        assert!(
            !again
                .iter()
                .any(|m| matches!(m, Message::ClipboardData { .. })),
            "slot already sent must not be pushed twice"
        );
    }

    #[test]
    fn test_oversize_clipboard_is_skipped() {
        let text = format!(
            "{}\nsection: options\n  clipboardSharingSize = 4\nend\n",
            TWO_CLIENT_CONFIG
        );
        let mut fx = Fixture::new(&text);
        let (left_id, _left_rx) = fx.connect("left", 1920, 1080);
        let (_right, mut right_rx) = fx.connect("right", 2560, 1440);

        fx.engine.client_message(
            left_id,
            Message::GrabClipboard {
                id: ClipboardId::General,
                sequence: 1,
            },
            fx.now,
        );
        let marshalled = ClipboardData::from_text("far too large for the limit").marshal();
        for message in chunk_clipboard(ClipboardId::General, 1, &marshalled) {
            fx.engine.client_message(left_id, message, fx.now);
        }
        Fixture::drain(&mut right_rx);

        fx.motion(1919, 540);
        let messages = Fixture::drain(&mut right_rx);
        assert!(
            !messages
                .iter()
                .any(|m| matches!(m, Message::ClipboardData { .. })),
            "oversize slot must be skipped"
        );
    }

    #[test]
    fn test_primary_grab_marks_all_clients_stale() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_left, mut left_rx) = fx.connect("left", 1920, 1080);
        let (_right, mut right_rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut left_rx);
        Fixture::drain(&mut right_rx);

        fx.engine
            .primary
            .set_clipboard(ClipboardId::General, &ClipboardData::from_text("local"));
        fx.engine.primary_event(
            PrimaryEvent::ClipboardGrabbed {
                id: ClipboardId::General,
            },
            fx.now,
        );

        assert_eq!(Fixture::drain(&mut left_rx).len(), 1);
        assert_eq!(Fixture::drain(&mut right_rx).len(), 1);
    }

    // ── Keep-alive ───────────────────────────────────────────────────────────

    #[test]
    fn test_tick_sends_keepalives_when_due() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut rx);

        fx.engine.on_tick(fx.now + Duration::from_secs(4));
        assert_eq!(Fixture::drain(&mut rx), vec![Message::KeepAlive]);
    }

    #[test]
    fn test_flatlined_connection_is_closed() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, _rx) = fx.connect("right", 2560, 1440);
        assert_eq!(fx.engine.connected_count(), 1);

        fx.engine.on_tick(fx.now + Duration::from_secs(10));
        assert_eq!(fx.engine.connected_count(), 0);
    }

    #[test]
    fn test_inbound_message_defers_flatline() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (id, _rx) = fx.connect("right", 2560, 1440);

        fx.engine.client_message(
            id,
            Message::KeepAlive,
            fx.now + Duration::from_secs(8),
        );
        fx.engine.on_tick(fx.now + Duration::from_secs(10));
        assert_eq!(fx.engine.connected_count(), 1);
    }

    // ── Screensaver ──────────────────────────────────────────────────────────

    #[test]
    fn test_screensaver_round_trip_restores_the_active_screen() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        fx.motion(1919, 540);
        Fixture::drain(&mut rx);
        assert_eq!(fx.engine.active_screen(), "right");

        fx.engine
            .primary_event(PrimaryEvent::ScreenSaver { on: true }, fx.now);
        assert_eq!(fx.engine.active_screen(), "primary");
        let on_msgs = Fixture::drain(&mut rx);
        assert!(on_msgs.contains(&Message::ScreenSaver { on: true }));
        assert!(on_msgs.contains(&Message::Leave));

        fx.engine
            .primary_event(PrimaryEvent::ScreenSaver { on: false }, fx.now);
        assert_eq!(fx.engine.active_screen(), "right");
        let off_msgs = Fixture::drain(&mut rx);
        assert!(off_msgs.contains(&Message::ScreenSaver { on: false }));
        assert!(off_msgs
            .iter()
            .any(|m| matches!(m, Message::Enter { .. })));
    }

    // ── Actions ──────────────────────────────────────────────────────────────

    #[test]
    fn test_switch_in_direction_action() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut rx);

        fx.engine
            .handle_action(&FilterAction::SwitchInDirection(Direction::Right), true);
        assert_eq!(fx.engine.active_screen(), "right");
        assert!(Fixture::drain(&mut rx)
            .iter()
            .any(|m| matches!(m, Message::Enter { .. })));
    }

    #[test]
    fn test_toggle_screen_round_trips() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut rx);

        fx.motion(1919, 540);
        assert_eq!(fx.engine.active_screen(), "right");

        fx.engine.handle_action(&FilterAction::ToggleScreen, true);
        assert_eq!(fx.engine.active_screen(), "primary");

        fx.engine.handle_action(&FilterAction::ToggleScreen, true);
        assert_eq!(fx.engine.active_screen(), "right");
    }

    #[test]
    fn test_hotkey_rule_consumes_the_key_event() {
        let text = format!(
            "{}\nsection: options\n  keystroke(F1) = switchToScreen(right)\nend\n",
            TWO_CLIENT_CONFIG
        );
        let mut fx = Fixture::new(&text);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut rx);

        // F1 triggers the rule instead of being forwarded.
        fx.engine.primary_event(
            PrimaryEvent::KeyDown {
                key: 0xEFBE,
                mask: 0,
                button: 0,
            },
            fx.now,
        );
        assert_eq!(fx.engine.active_screen(), "right");
        let messages = Fixture::drain(&mut rx);
        assert!(!messages
            .iter()
            .any(|m| matches!(m, Message::KeyDown { .. })));
    }

    // ── Reload ───────────────────────────────────────────────────────────────

    #[test]
    fn test_reload_without_own_screen_is_rejected() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let replacement = parse_config(
            "section: screens\n  other:\nend\n",
        )
        .unwrap();
        fx.engine.reload(replacement);
        // The old topology is still in force.
        assert!(fx.engine.config.topology.contains("right"));
    }

    #[test]
    fn test_reload_drops_clients_removed_from_topology() {
        let mut fx = Fixture::new(TWO_CLIENT_CONFIG);
        let (_id, mut rx) = fx.connect("right", 2560, 1440);
        Fixture::drain(&mut rx);

        let replacement = parse_config(
            "section: screens\n  primary:\n  left:\nend\n",
        )
        .unwrap();
        fx.engine.reload(replacement);
        assert_eq!(fx.engine.connected_count(), 0);
        assert!(Fixture::drain(&mut rx).contains(&Message::Close));
    }
}
