use crate::error::{KeeperError, Result};
use crate::events::{
    ApplicationIdentity, DisplayEvent, GroupState, LayoutSet, LayoutTarget, WatchedProperty,
    WindowEventMask, WindowId,
};
use crate::{keeper_error, trace_if_enabled};
use crate::utils::DisplayFinder;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection as _};
use x11rb::protocol::xkb::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, EventMask, ModMask, PropMode,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::keyboard_state::{KeyboardBinding, KeyboardMap, KeyboardSlot};
use super::r#trait::DisplayConnection;

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        _NET_ACTIVE_WINDOW,
        _NET_WM_NAME,
        UTF8_STRING,
    }
}

const XKB_MAJOR_VERSION: u16 = 1;
const XKB_MINOR_VERSION: u16 = 0;

/// Соединение с X сервером и привязка XKB к основной клавиатуре.
///
/// `RustConnection` допускает одновременную отправку запросов из нескольких
/// потоков, ответы сопоставляются по sequence number, поэтому отдельная
/// блокировка вокруг запросов не нужна.
pub struct X11Connection {
    conn: RustConnection,
    root: WindowId,
    atoms: Atoms,
    device_id: u8,
    keyboard: KeyboardSlot,
    healthy: AtomicBool,
}

impl X11Connection {
    /// Строгая последовательность инициализации; любая ошибка фатальна
    pub fn connect(display: &str) -> Result<Self> {
        info!("Инициализация X11Connection");

        let display_name = DisplayFinder::find_display(display)?;
        let (conn, screen_num) = x11rb::connect(Some(display_name.as_str()))?;
        info!("Подключено к дисплею {} (экран {})", display_name, screen_num);

        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| keeper_error!(internal, "Экран {} не найден в setup", screen_num))?;

        let atoms = Atoms::new(&conn)?.reply()?;

        if conn
            .extension_information(xkb::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(keeper_error!(extension_unavailable, "{}", xkb::X11_EXTENSION_NAME));
        }

        let use_extension = conn
            .xkb_use_extension(XKB_MAJOR_VERSION, XKB_MINOR_VERSION)?
            .reply()?;
        if !use_extension.supported {
            return Err(keeper_error!(
                extension_unavailable,
                "XKB {}.{} не поддерживается сервером (сервер {}.{})",
                XKB_MAJOR_VERSION,
                XKB_MINOR_VERSION,
                use_extension.server_major,
                use_extension.server_minor
            ));
        }

        let core_state = conn.xkb_get_state(xkb::ID::USE_CORE_KBD.into())?.reply()?;
        let device_id = core_state.device_id;
        info!("Основная клавиатура XKB: устройство {}", device_id);

        let binding = Self::fetch_binding(&conn, device_id)?;
        info!(
            "Раскладки: {} (символы: {}, устройство {}, keycodes {}..={})",
            binding.map.layouts,
            binding.map.symbols_name,
            binding.map.device_id,
            binding.map.min_key_code,
            binding.map.max_key_code
        );

        let required_events = xkb::EventType::NEW_KEYBOARD_NOTIFY
            | xkb::EventType::MAP_NOTIFY
            | xkb::EventType::STATE_NOTIFY;
        let required_map_parts = xkb::MapPart::KEY_TYPES
            | xkb::MapPart::KEY_SYMS
            | xkb::MapPart::MODIFIER_MAP
            | xkb::MapPart::EXPLICIT_COMPONENTS
            | xkb::MapPart::KEY_ACTIONS
            | xkb::MapPart::VIRTUAL_MODS
            | xkb::MapPart::VIRTUAL_MOD_MAP;

        conn.xkb_select_events(
            u16::from(device_id),
            xkb::EventType::from(0u16),
            required_events,
            required_map_parts,
            required_map_parts,
            &xkb::SelectEventsAux::new(),
        )?
        .check()?;

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )?
        .check()?;
        conn.flush()?;

        info!("X11Connection инициализировано");

        Ok(Self {
            conn,
            root,
            atoms,
            device_id,
            keyboard: KeyboardSlot::new(binding),
            healthy: AtomicBool::new(true),
        })
    }

    /// Построить карту и состояние по текущему устройству
    fn fetch_binding(conn: &RustConnection, device_id: u8) -> Result<KeyboardBinding> {
        let device_spec = u16::from(device_id);

        let names_cookie = conn.xkb_get_names(
            device_spec,
            xkb::NameDetail::GROUP_NAMES | xkb::NameDetail::SYMBOLS,
        )?;
        let state_cookie = conn.xkb_get_state(device_spec)?;

        let names = names_cookie.reply()?;
        let state = state_cookie.reply()?;

        let groups = names.value_list.groups.clone().unwrap_or_default();
        let layouts = LayoutSet::new(Self::resolve_atom_names(conn, &groups)?);
        let symbols_name = match names.value_list.symbols_name {
            Some(atom) => Self::resolve_atom_names(conn, &[atom])?
                .pop()
                .unwrap_or_else(|| "NONE".to_string()),
            None => "NONE".to_string(),
        };

        let map = KeyboardMap {
            device_id: names.device_id,
            min_key_code: names.min_key_code,
            max_key_code: names.max_key_code,
            layouts,
            symbols_name,
        };

        let state = GroupState {
            base_mods: u16::from(state.base_mods),
            latched_mods: u16::from(state.latched_mods),
            locked_mods: u16::from(state.locked_mods),
            base_group: state.base_group,
            latched_group: state.latched_group,
            locked_group: u8::from(state.locked_group),
            group: u8::from(state.group),
        };

        Ok(KeyboardBinding::new(map, state))
    }

    /// Сначала отправляем все запросы, потом собираем ответы
    fn resolve_atom_names(conn: &RustConnection, atoms: &[Atom]) -> Result<Vec<String>> {
        let cookies = atoms
            .iter()
            .map(|atom| conn.get_atom_name(*atom))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut names = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let reply = cookie.reply()?;
            names.push(String::from_utf8_lossy(&reply.name).into_owned());
        }
        Ok(names)
    }

    /// Залогировать неудачный запрос и пометить соединение, если оно потеряно
    fn note_error(&self, operation: &str, err: KeeperError) {
        if err.is_connection_lost() {
            if self.healthy.swap(false, Ordering::SeqCst) {
                warn!("Соединение с X сервером потеряно ({}): {}", operation, err);
            }
        } else {
            debug!("Запрос {} завершился ошибкой: {}", operation, err);
        }
    }

    fn device_spec(&self) -> xkb::DeviceSpec {
        u16::from(self.device_id)
    }

    fn try_active_window(&self) -> Result<Option<WindowId>> {
        let reply = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms._NET_ACTIVE_WINDOW,
                AtomEnum::WINDOW,
                0,
                1,
            )?
            .reply()?;

        Ok(reply
            .value32()
            .and_then(|mut values| values.next())
            .filter(|window| *window != x11rb::NONE))
    }

    fn try_window_identity(&self, window: WindowId) -> Result<ApplicationIdentity> {
        let reply = self
            .conn
            .get_property(
                false,
                window,
                AtomEnum::WM_CLASS,
                AtomEnum::STRING,
                0,
                u32::MAX,
            )?
            .reply()?;

        Ok(ApplicationIdentity::from_wm_class(&reply.value))
    }

    fn try_window_title(&self, window: WindowId) -> Result<String> {
        let utf8 = self
            .conn
            .get_property(
                false,
                window,
                self.atoms._NET_WM_NAME,
                self.atoms.UTF8_STRING,
                0,
                u32::MAX,
            )?
            .reply()?;

        if utf8.type_ == self.atoms.UTF8_STRING && !utf8.value.is_empty() {
            return Ok(String::from_utf8_lossy(&utf8.value).into_owned());
        }

        let plain = self
            .conn
            .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::ANY, 0, u32::MAX)?
            .reply()?;

        Ok(decode_text_property(
            plain.type_ == Atom::from(AtomEnum::STRING),
            &plain.value,
        ))
    }

    fn try_set_window_title(&self, window: WindowId, title: &str) -> Result<()> {
        self.conn
            .change_property8(
                PropMode::REPLACE,
                window,
                self.atoms._NET_WM_NAME,
                self.atoms.UTF8_STRING,
                title.as_bytes(),
            )?
            .check()?;
        Ok(())
    }

    fn try_layout_switch(&self, target: LayoutTarget) -> Result<bool> {
        let layout_count = self.layout_names().len();
        let current = match target {
            LayoutTarget::Next => self.current_layout_index()?,
            LayoutTarget::Index(_) => 0,
        };

        let Some(index) = target.resolve(current, layout_count) else {
            warn!("Нет раскладок для переключения");
            return Ok(false);
        };

        if index >= layout_count {
            warn!(
                "Раскладка {} вне диапазона (доступно {})",
                index, layout_count
            );
            return Ok(false);
        }

        debug!("Запрос смены раскладки {} -> {}", target, index);

        let no_mods = ModMask::from(0u16);
        self.conn
            .xkb_latch_lock_state(
                self.device_spec(),
                no_mods,
                no_mods,
                true,
                xkb::Group::from(index as u8),
                no_mods,
                false,
                0,
            )?
            .check()?;

        Ok(true)
    }

    fn try_layout_names(&self) -> Result<Vec<String>> {
        let names = self
            .conn
            .xkb_get_names(self.device_spec(), xkb::NameDetail::GROUP_NAMES)?
            .reply()?;
        let groups = names.value_list.groups.unwrap_or_default();
        Self::resolve_atom_names(&self.conn, &groups)
    }

    fn decode(&self, event: Event) -> DisplayEvent {
        match event {
            Event::PropertyNotify(event) => {
                let property = if event.atom == self.atoms._NET_ACTIVE_WINDOW {
                    WatchedProperty::ActiveWindow
                } else if event.atom == self.atoms._NET_WM_NAME
                    || event.atom == Atom::from(AtomEnum::WM_NAME)
                {
                    WatchedProperty::WindowName
                } else {
                    WatchedProperty::Other
                };

                DisplayEvent::PropertyChanged {
                    window: event.window,
                    property,
                }
            }
            Event::XkbMapNotify(_) => DisplayEvent::MapChanged,
            Event::XkbNewKeyboardNotify(event) => DisplayEvent::NewKeyboard {
                device_id: event.device_id,
                keycodes_changed: event.changed.contains(xkb::NKNDetail::KEYCODES),
            },
            Event::XkbStateNotify(event) => DisplayEvent::StateChanged {
                state: GroupState {
                    base_mods: u16::from(event.base_mods),
                    latched_mods: u16::from(event.latched_mods),
                    locked_mods: u16::from(event.locked_mods),
                    base_group: event.base_group,
                    latched_group: event.latched_group,
                    locked_group: u8::from(event.locked_group),
                    group: u8::from(event.group),
                },
                group_changed: event.changed.contains(xkb::StatePart::GROUP_STATE),
            },
            Event::Error(err) => {
                // Асинхронные ошибки непроверенных запросов, например BadWindow
                debug!("Ошибка X11 в очереди событий: {:?}", err);
                DisplayEvent::Other
            }
            _ => DisplayEvent::Other,
        }
    }
}

/// STRING по ICCCM - ISO-8859-1, остальные типы (UTF8_STRING, COMPOUND_TEXT) читаем как UTF-8
fn decode_text_property(latin1: bool, value: &[u8]) -> String {
    if latin1 {
        value.iter().map(|&b| char::from(b)).collect()
    } else {
        String::from_utf8_lossy(value).into_owned()
    }
}

impl DisplayConnection for X11Connection {
    fn root_window(&self) -> WindowId {
        self.root
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn current_layout_index(&self) -> Result<usize> {
        let reply = self
            .conn
            .xkb_get_state(self.device_spec())
            .map_err(KeeperError::from)
            .and_then(|cookie| cookie.reply().map_err(KeeperError::from));

        match reply {
            Ok(reply) => Ok(u8::from(reply.group) as usize),
            Err(err) => {
                let lost = err.is_connection_lost();
                self.note_error("xkb_get_state", err);
                if lost {
                    Err(KeeperError::ConnectionLost)
                } else {
                    Err(keeper_error!(internal, "xkb_get_state завершился ошибкой"))
                }
            }
        }
    }

    fn request_layout_switch(&self, target: LayoutTarget) -> bool {
        self.try_layout_switch(target).unwrap_or_else(|err| {
            self.note_error("xkb_latch_lock_state", err);
            false
        })
    }

    fn layout_names(&self) -> Vec<String> {
        self.try_layout_names().unwrap_or_else(|err| {
            self.note_error("xkb_get_names", err);
            Vec::new()
        })
    }

    fn symbols_label(&self) -> String {
        self.keyboard.current().map.symbols_name.clone()
    }

    fn active_window(&self) -> Option<WindowId> {
        self.try_active_window().unwrap_or_else(|err| {
            self.note_error("get_property(_NET_ACTIVE_WINDOW)", err);
            None
        })
    }

    fn window_identity(&self, window: WindowId) -> ApplicationIdentity {
        self.try_window_identity(window).unwrap_or_else(|err| {
            self.note_error("get_property(WM_CLASS)", err);
            ApplicationIdentity::default()
        })
    }

    fn window_title(&self, window: WindowId) -> String {
        self.try_window_title(window).unwrap_or_else(|err| {
            self.note_error("get_property(_NET_WM_NAME)", err);
            String::new()
        })
    }

    fn set_window_title(&self, window: WindowId, title: &str) -> bool {
        match self.try_set_window_title(window, title) {
            Ok(()) => true,
            Err(err) => {
                self.note_error("change_property(_NET_WM_NAME)", err);
                false
            }
        }
    }

    fn set_window_event_mask(&self, window: WindowId, mask: WindowEventMask) {
        let event_mask = match mask {
            WindowEventMask::Disabled => EventMask::NO_EVENT,
            WindowEventMask::PropertyChange => EventMask::PROPERTY_CHANGE,
        };

        let result = self
            .conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(event_mask))
            .map_err(KeeperError::from)
            .and_then(|_| self.conn.flush().map_err(KeeperError::from));

        if let Err(err) = result {
            self.note_error("change_window_attributes", err);
        }
    }

    fn poll_event(&self) -> Result<Option<DisplayEvent>> {
        match self.conn.poll_for_event() {
            Ok(Some(event)) => {
                trace_if_enabled!("Сырое событие X11: {:?}", event);
                Ok(Some(self.decode(event)))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    fn keyboard_device_id(&self) -> u8 {
        self.device_id
    }

    fn rebuild_keyboard(&self) -> Result<()> {
        let binding = Self::fetch_binding(&self.conn, self.device_id)?;
        let old = self.keyboard.swap(binding);
        let new = self.keyboard.current();
        info!(
            "Карта клавиатуры пересобрана: {} -> {} (символы: {}, группа #{})",
            old.map.layouts,
            new.map.layouts,
            new.map.symbols_name,
            new.group()
        );
        Ok(())
    }

    fn update_keyboard_state(&self, state: GroupState) {
        self.keyboard.update_state(state);
    }
}

impl Drop for X11Connection {
    fn drop(&mut self) {
        info!("X11Connection завершает работу");
    }
}
