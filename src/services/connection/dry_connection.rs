use crate::error::{KeeperError, Result};
use crate::events::{
    ApplicationIdentity, DisplayEvent, GroupState, LayoutSet, LayoutTarget, WatchedProperty,
    WindowEventMask, WindowId,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

use super::keyboard_state::{KeyboardBinding, KeyboardMap, KeyboardSlot};
use super::r#trait::DisplayConnection;

const DRY_ROOT: WindowId = 1;
const DRY_DEVICE: u8 = 3;

#[derive(Debug, Clone)]
struct FakeWindow {
    identity: ApplicationIdentity,
    title: String,
    mask: Option<WindowEventMask>,
}

#[derive(Debug, Default)]
struct DryState {
    layouts: Vec<String>,
    group: usize,
    active: Option<WindowId>,
    windows: IndexMap<WindowId, FakeWindow>,
    queue: VecDeque<DisplayEvent>,
    switch_requests: Vec<usize>,
    title_writes: Vec<(WindowId, String)>,
    fail_title_writes: bool,
}

/// Эмуляция смены фокуса в режиме сухого запуска
#[derive(Debug)]
struct Simulation {
    interval: Duration,
    last_tick: Instant,
    next_window: usize,
}

/// Соединение без X сервера: раскладки и окна живут в памяти.
///
/// Ведёт себя как сервер там, где это важно для арбитра: смена группы
/// порождает StateChanged, запись заголовка порождает PropertyChanged, если
/// для окна включены события.
pub struct DryRunConnection {
    state: Mutex<DryState>,
    keyboard: KeyboardSlot,
    healthy: AtomicBool,
    simulation: Mutex<Option<Simulation>>,
}

impl DryRunConnection {
    pub fn new(layouts: &[&str]) -> Self {
        let layouts: Vec<String> = layouts.iter().map(|name| name.to_string()).collect();
        let keyboard = KeyboardSlot::new(Self::binding_for(&layouts, 0));

        Self {
            state: Mutex::new(DryState {
                layouts,
                ..DryState::default()
            }),
            keyboard,
            healthy: AtomicBool::new(true),
            simulation: Mutex::new(None),
        }
    }

    /// Набор для --dry-run: три раскладки, три окна, смена фокуса каждые 10 секунд
    pub fn demo() -> Self {
        info!("Dry-run режим - X11Connection работает в режиме эмуляции");

        let connection = Self::new(&["us", "ru", "de"]);
        connection.add_window(100, ApplicationIdentity::new("Term", "xterm"), "Terminal - dry_run");
        connection.add_window(101, ApplicationIdentity::new("navigator", "Firefox"), "Browser - dry_run");
        connection.add_window(102, ApplicationIdentity::new("emacs", "Emacs"), "Editor - dry_run");
        connection.state.lock().active = Some(100);

        *connection.simulation.lock() = Some(Simulation {
            interval: Duration::from_secs(10),
            last_tick: Instant::now(),
            next_window: 1,
        });

        connection
    }

    fn binding_for(layouts: &[String], group: usize) -> KeyboardBinding {
        KeyboardBinding::new(
            KeyboardMap {
                device_id: DRY_DEVICE,
                min_key_code: 8,
                max_key_code: 255,
                layouts: LayoutSet::new(layouts.to_vec()),
                symbols_name: format!("pc+{}", layouts.join("+")),
            },
            GroupState {
                group: group as u8,
                locked_group: group as u8,
                ..GroupState::default()
            },
        )
    }

    pub fn add_window(&self, window: WindowId, identity: ApplicationIdentity, title: &str) {
        self.state.lock().windows.insert(
            window,
            FakeWindow {
                identity,
                title: title.to_string(),
                mask: None,
            },
        );
    }

    /// Сделать окно активным и поставить в очередь PropertyNotify на корне
    pub fn focus(&self, window: WindowId) {
        let mut state = self.state.lock();
        state.active = Some(window);
        state.queue.push_back(DisplayEvent::PropertyChanged {
            window: DRY_ROOT,
            property: WatchedProperty::ActiveWindow,
        });
    }

    /// Смена группы "пользователем", мимо запросов арбитра
    pub fn press_group(&self, group: usize) {
        let mut state = self.state.lock();
        state.group = group;
        state.queue.push_back(Self::state_event(group));
    }

    /// Перечитать раскладки, как после смены keymap на сервере
    pub fn replace_layouts(&self, layouts: &[&str]) {
        let mut state = self.state.lock();
        state.layouts = layouts.iter().map(|name| name.to_string()).collect();
        if state.group >= state.layouts.len() {
            state.group = 0;
        }
        state.queue.push_back(DisplayEvent::MapChanged);
    }

    /// Внешнее приложение меняет свой заголовок
    pub fn retitle(&self, window: WindowId, title: &str) {
        let mut state = self.state.lock();
        let notify = match state.windows.get_mut(&window) {
            Some(fake) => {
                fake.title = title.to_string();
                fake.mask == Some(WindowEventMask::PropertyChange)
            }
            None => false,
        };
        if notify {
            state.queue.push_back(DisplayEvent::PropertyChanged {
                window,
                property: WatchedProperty::WindowName,
            });
        }
    }

    pub fn push_event(&self, event: DisplayEvent) {
        self.state.lock().queue.push_back(event);
    }

    pub fn disconnect(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    pub fn fail_title_writes(&self, fail: bool) {
        self.state.lock().fail_title_writes = fail;
    }

    pub fn switch_requests(&self) -> Vec<usize> {
        self.state.lock().switch_requests.clone()
    }

    pub fn title_writes(&self) -> Vec<(WindowId, String)> {
        self.state.lock().title_writes.clone()
    }

    pub fn title_of(&self, window: WindowId) -> Option<String> {
        self.state.lock().windows.get(&window).map(|fake| fake.title.clone())
    }

    pub fn mask_of(&self, window: WindowId) -> Option<WindowEventMask> {
        self.state.lock().windows.get(&window).and_then(|fake| fake.mask)
    }

    pub fn pending_events(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn keyboard(&self) -> std::sync::Arc<KeyboardBinding> {
        self.keyboard.current()
    }

    fn state_event(group: usize) -> DisplayEvent {
        DisplayEvent::StateChanged {
            state: GroupState {
                group: group as u8,
                locked_group: group as u8,
                ..GroupState::default()
            },
            group_changed: true,
        }
    }

    fn tick_simulation(&self) {
        let mut simulation = self.simulation.lock();
        let Some(sim) = simulation.as_mut() else {
            return;
        };
        if sim.last_tick.elapsed() < sim.interval {
            return;
        }
        sim.last_tick = Instant::now();

        let next = {
            let state = self.state.lock();
            if state.windows.is_empty() {
                return;
            }
            let index = sim.next_window % state.windows.len();
            state.windows.get_index(index).map(|(id, fake)| (*id, fake.title.clone()))
        };
        sim.next_window += 1;

        if let Some((window, title)) = next {
            info!("Dry-run: эмулируем смену окна на: {}", title);
            self.focus(window);
        }
    }
}

impl DisplayConnection for DryRunConnection {
    fn root_window(&self) -> WindowId {
        DRY_ROOT
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn current_layout_index(&self) -> Result<usize> {
        if !self.is_healthy() {
            return Err(KeeperError::ConnectionLost);
        }
        Ok(self.state.lock().group)
    }

    fn request_layout_switch(&self, target: LayoutTarget) -> bool {
        let mut state = self.state.lock();
        let Some(index) = target.resolve(state.group, state.layouts.len()) else {
            return false;
        };
        if index >= state.layouts.len() {
            return false;
        }

        info!("[DRY RUN] Смена раскладки {} -> {}", target, index);
        state.switch_requests.push(index);
        if state.group != index {
            state.group = index;
            state.queue.push_back(Self::state_event(index));
        }
        true
    }

    fn layout_names(&self) -> Vec<String> {
        self.state.lock().layouts.clone()
    }

    fn symbols_label(&self) -> String {
        self.keyboard.current().map.symbols_name.clone()
    }

    fn active_window(&self) -> Option<WindowId> {
        self.state.lock().active
    }

    fn window_identity(&self, window: WindowId) -> ApplicationIdentity {
        self.state
            .lock()
            .windows
            .get(&window)
            .map(|fake| fake.identity.clone())
            .unwrap_or_default()
    }

    fn window_title(&self, window: WindowId) -> String {
        self.title_of(window).unwrap_or_default()
    }

    fn set_window_title(&self, window: WindowId, title: &str) -> bool {
        let mut state = self.state.lock();
        if state.fail_title_writes {
            return false;
        }

        let notify = match state.windows.get_mut(&window) {
            Some(fake) => {
                fake.title = title.to_string();
                fake.mask == Some(WindowEventMask::PropertyChange)
            }
            None => return false,
        };

        info!("[DRY RUN] Заголовок окна {}: {}", window, title);
        state.title_writes.push((window, title.to_string()));
        if notify {
            state.queue.push_back(DisplayEvent::PropertyChanged {
                window,
                property: WatchedProperty::WindowName,
            });
        }
        true
    }

    fn set_window_event_mask(&self, window: WindowId, mask: WindowEventMask) {
        if let Some(fake) = self.state.lock().windows.get_mut(&window) {
            fake.mask = Some(mask);
        }
    }

    fn poll_event(&self) -> Result<Option<DisplayEvent>> {
        if !self.is_healthy() {
            return Err(KeeperError::ConnectionLost);
        }
        self.tick_simulation();
        Ok(self.state.lock().queue.pop_front())
    }

    fn keyboard_device_id(&self) -> u8 {
        DRY_DEVICE
    }

    fn rebuild_keyboard(&self) -> Result<()> {
        let (layouts, group) = {
            let state = self.state.lock();
            (state.layouts.clone(), state.group)
        };
        self.keyboard.swap(Self::binding_for(&layouts, group));
        Ok(())
    }

    fn update_keyboard_state(&self, state: GroupState) {
        self.keyboard.update_state(state);
    }
}
