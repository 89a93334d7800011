use crate::config::{Config, RegistryRecord};
use crate::error::{KeeperError, Result};
use crate::events::{
    ApplicationIdentity, LayoutSet, LayoutTarget, MapInvalidation, Notification, PolicyState,
    WindowEventMask, WindowId,
};
use crate::services::connection::DisplayConnection;
use crate::services::observer::LayoutObserver;
use crate::services::registry::{RegistryEntry, WindowRegistry};
use crate::debug_if_enabled;
use std::sync::Arc;
use tracing::{info, warn};

/// Координатор раскладок по приложениям.
///
/// Получает уведомления от EventPump, ведёт реестр и отправляет запросы
/// смены раскладки и заголовков обратно в соединение. Владеет контекстом
/// активного окна; всё состояние меняется только из одного контекста.
pub struct LayoutArbiter {
    connection: Arc<dyn DisplayConnection>,
    observer: Box<dyn LayoutObserver>,
    config: Arc<Config>,
    registry: WindowRegistry,
    active: Option<(WindowId, ApplicationIdentity)>,
    layouts: LayoutSet,
    /// Последний записанный нами заголовок активного окна
    composed_title: Option<String>,
}

impl LayoutArbiter {
    pub fn new(
        connection: Arc<dyn DisplayConnection>,
        mut observer: Box<dyn LayoutObserver>,
        config: Arc<Config>,
    ) -> Self {
        let layouts = LayoutSet::new(connection.layout_names());
        info!(
            "Инициализация LayoutArbiter: раскладки {} ({})",
            layouts,
            connection.symbols_label()
        );
        if layouts.is_empty() {
            warn!("Сервер не сообщил ни одной раскладки");
        }
        observer.on_layout_names_changed(layouts.names());

        Self {
            connection,
            observer,
            config,
            registry: WindowRegistry::new(),
            active: None,
            layouts,
            composed_title: None,
        }
    }

    pub fn handle_notification(&mut self, notification: Notification) -> Result<()> {
        match notification {
            Notification::ActiveWindowChanged(window) => self.on_active_window_changed(window),
            Notification::WindowTitleChanged(window) => {
                self.on_window_title_changed(window);
                Ok(())
            }
            Notification::KeyboardLayoutChanged(index) => {
                self.on_layout_changed(index);
                Ok(())
            }
            Notification::KeyboardMapInvalidated(reason) => {
                self.on_map_invalidated(reason);
                Ok(())
            }
            Notification::ConnectionLost => Err(KeeperError::ConnectionLost),
        }
    }

    fn on_active_window_changed(&mut self, window: WindowId) -> Result<()> {
        debug_if_enabled!("Смена активного окна: {}", window);

        // 1. Отпускаем предыдущее окно
        if let Some((previous, identity)) = self.active.take() {
            self.connection
                .set_window_event_mask(previous, WindowEventMask::Disabled);
            if self.config.title.rewrite && self.is_managed(&identity) {
                self.restore_title(previous, &identity);
            }
        }
        self.composed_title = None;

        // 2. Новое окно становится активным
        let identity = self.connection.window_identity(window);
        self.active = Some((window, identity.clone()));
        self.connection
            .set_window_event_mask(window, WindowEventMask::PropertyChange);

        // 3. Пропускаемые и безымянные окна не трогаем
        if !self.is_managed(&identity) {
            debug_if_enabled!("Окно {} пропущено ({})", window, identity);
            return Ok(());
        }

        // 4. Запись реестра
        let live = self.connection.current_layout_index()?;
        if self.registry.find(&identity).is_none() {
            info!("Новое приложение {}: раскладка #{}", identity, live);
            self.registry.upsert(&identity, live, PolicyState::Normal);
        }
        let (target, _) = self.stored_layout(&identity).unwrap_or((live, PolicyState::Normal));

        // 5. Возвращаем приложению его раскладку
        if target != live {
            info!(
                "Приложение {}: раскладка {} -> {}",
                identity,
                self.layout_label(live),
                self.layout_label(target)
            );
            if !self
                .connection
                .request_layout_switch(LayoutTarget::Index(target))
            {
                warn!("Не удалось переключить раскладку на #{}", target);
            }
        }

        // 6. Заголовок
        if self.config.title.rewrite {
            let has_saved = self
                .registry
                .find(&identity)
                .is_some_and(|entry| entry.saved_title.is_some());
            if !has_saved {
                let title = self.connection.window_title(window);
                self.registry.set_saved_title(&identity, &title);
            }
            self.compose_title(window, &identity, live);
        }

        // 7. Иконка
        self.observer.on_layout_icon_changed(target);
        Ok(())
    }

    fn on_layout_changed(&mut self, index: usize) {
        let Some((window, mut identity)) = self.active.clone() else {
            debug_if_enabled!("Смена раскладки на #{} без активного окна", index);
            return;
        };

        // WM_CLASS мог не прочитаться при смене фокуса
        if identity.is_empty() {
            identity = self.connection.window_identity(window);
            if !identity.is_empty() {
                self.active = Some((window, identity.clone()));
            }
        }

        if !self.is_managed(&identity) {
            self.observer.on_layout_icon_changed(index);
            return;
        }

        let mut shown = index;
        let mut announce = false;

        match self.stored_layout(&identity) {
            None => {
                info!("Новое приложение {}: раскладка #{}", identity, index);
                self.registry.upsert(&identity, index, PolicyState::Normal);
            }
            Some((stored, policy)) => {
                if stored != index {
                    match policy {
                        PolicyState::FixedLock => {
                            info!(
                                "Раскладка {} зафиксирована за {}, откат",
                                self.layout_label(stored),
                                identity
                            );
                            if !self
                                .connection
                                .request_layout_switch(LayoutTarget::Index(stored))
                            {
                                warn!("Не удалось вернуть раскладку #{}", stored);
                            }
                            shown = stored;
                        }
                        PolicyState::Normal | PolicyState::FirstLock => {
                            debug_if_enabled!(
                                "Приложение {} запоминает раскладку #{}",
                                identity,
                                index
                            );
                            self.registry.set_layout(&identity, index);
                            announce = true;
                        }
                    }
                }
                if policy == PolicyState::FirstLock {
                    announce = true;
                }
            }
        }

        if announce && self.config.notify.announce {
            self.observer.on_announce();
        }

        if self.config.title.rewrite {
            self.compose_title(window, &identity, shown);
        }

        self.observer.on_layout_icon_changed(index);
    }

    fn on_map_invalidated(&mut self, reason: MapInvalidation) {
        let names = self.connection.layout_names();
        if names.is_empty() && !self.layouts.is_empty() {
            // Пустой ответ - сбой запроса, а не клавиатура без раскладок
            warn!(
                "Раскладки не перечитаны ({}), остаётся прежний набор {}",
                reason, self.layouts
            );
            return;
        }

        self.layouts = LayoutSet::new(names);
        info!(
            "Раскладки перечитаны ({}): {} ({})",
            reason,
            self.layouts,
            self.connection.symbols_label()
        );
        self.observer.on_layout_names_changed(self.layouts.names());
    }

    fn on_window_title_changed(&mut self, window: WindowId) {
        if !self.config.title.rewrite {
            return;
        }
        let Some((active, identity)) = self.active.clone() else {
            return;
        };
        if active != window || !self.is_managed(&identity) {
            return;
        }

        let title = self.connection.window_title(window);
        if self.composed_title.as_deref() == Some(title.as_str()) {
            return;
        }

        debug_if_enabled!("Окно {} сменило заголовок: {}", window, title);
        self.registry.set_saved_title(&identity, &title);

        let live = match self.connection.current_layout_index() {
            Ok(index) => index,
            Err(e) => {
                warn!("Не удалось получить текущую раскладку: {}", e);
                return;
            }
        };
        self.compose_title(window, &identity, live);
    }

    /// Ручной переход политики приложения по циклу
    pub fn cycle_policy(&mut self, identity: &ApplicationIdentity) -> Option<PolicyState> {
        let policy = self.registry.cycle_policy(identity)?;
        info!("Политика {}: {}", identity, policy);
        Some(policy)
    }

    pub fn cycle_active_policy(&mut self) -> Option<PolicyState> {
        let (_, identity) = self.active.clone()?;
        if !self.is_managed(&identity) {
            return None;
        }
        self.cycle_policy(&identity)
    }

    /// Ручное переключение на следующую раскладку, реестр не трогаем
    pub fn switch_next_layout(&self) -> bool {
        self.connection.request_layout_switch(LayoutTarget::Next)
    }

    /// Загрузить сохранённые записи; индексы проверяются по текущим раскладкам
    pub fn load_snapshot(&mut self, records: &[RegistryRecord]) {
        for record in records {
            let identity = record.identity();
            if !self.is_managed(&identity) {
                warn!("Сохранённая запись {} пропущена", identity);
                continue;
            }

            let layout = if self.layouts.is_empty() {
                record.layout
            } else {
                self.layouts.clamp(record.layout)
            };
            if layout != record.layout {
                warn!(
                    "Раскладка #{} для {} вне диапазона, используется #0",
                    record.layout, identity
                );
            }
            self.registry.upsert(&identity, layout, record.policy);
        }
        info!("Загружено записей реестра: {}", self.registry.len());
    }

    /// Плоские записи реестра с именами раскладок
    pub fn snapshot(&self) -> Vec<RegistryRecord> {
        self.registry
            .iter()
            .map(|entry| RegistryRecord {
                instance: entry.identity.instance.clone(),
                class: entry.identity.class.clone(),
                layout: entry.layout,
                policy: entry.policy,
                label: self.layouts.name(entry.layout).map(str::to_string),
            })
            .collect()
    }

    /// Вернуть исходный заголовок активному окну перед выходом
    pub fn restore_active_title(&mut self) {
        let Some((window, identity)) = self.active.clone() else {
            return;
        };
        self.connection
            .set_window_event_mask(window, WindowEventMask::Disabled);
        if self.config.title.rewrite && self.is_managed(&identity) {
            self.restore_title(window, &identity);
        }
        self.composed_title = None;
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn active_window(&self) -> Option<WindowId> {
        self.active.as_ref().map(|(window, _)| *window)
    }

    fn is_managed(&self, identity: &ApplicationIdentity) -> bool {
        !identity.is_empty() && !self.config.is_skipped(identity)
    }

    /// Сохранённая раскладка с приведением к текущему набору
    fn stored_layout(&mut self, identity: &ApplicationIdentity) -> Option<(usize, PolicyState)> {
        let RegistryEntry { layout, policy, .. } = self.registry.find(identity)?.clone();
        if self.layouts.is_empty() {
            return Some((layout, policy));
        }

        let clamped = self.layouts.clamp(layout);
        if clamped != layout {
            warn!(
                "Раскладка #{} для {} устарела, используется #{}",
                layout, identity, clamped
            );
            self.registry.set_layout(identity, clamped);
        }
        Some((clamped, policy))
    }

    fn layout_label(&self, index: usize) -> String {
        match self.layouts.name(index) {
            Some(name) => format!("{} (#{})", name, index),
            None => format!("#{}", index),
        }
    }

    fn compose_title(&mut self, window: WindowId, identity: &ApplicationIdentity, layout: usize) {
        let Some(original) = self
            .registry
            .find(identity)
            .and_then(|entry| entry.saved_title.clone())
        else {
            return;
        };

        let label = self.layouts.name(layout).unwrap_or_default();
        let composed = self.config.title.compose(&original, label);

        // Свою запись не ловим как внешнюю смену заголовка
        self.connection
            .set_window_event_mask(window, WindowEventMask::Disabled);
        let written = self.connection.set_window_title(window, &composed);
        self.connection
            .set_window_event_mask(window, WindowEventMask::PropertyChange);

        if written {
            self.composed_title = Some(composed);
        } else {
            warn!("Не удалось записать заголовок окна {}", window);
        }
    }

    fn restore_title(&mut self, window: WindowId, identity: &ApplicationIdentity) {
        if let Some(title) = self.registry.clear_saved_title(identity) {
            debug_if_enabled!("Восстановление заголовка окна {}: {}", window, title);
            if !self.connection.set_window_title(window, &title) {
                warn!("Не удалось восстановить заголовок окна {}", window);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::DryRunConnection;
    use crate::services::observer::testing::{Observed, RecordingObserver};

    const TERM: WindowId = 100;
    const BROWSER: WindowId = 101;
    const SKIPPED: WindowId = 102;

    fn term() -> ApplicationIdentity {
        ApplicationIdentity::new("Term", "xterm")
    }

    fn test_config(rewrite: bool) -> Arc<Config> {
        let mut config = Config::default();
        config.title.rewrite = rewrite;
        config.notify.announce = true;
        config.windows.skip_list = vec!["QXKB5".to_string()];
        config.build_optimization_indexes();
        Arc::new(config)
    }

    fn setup(
        layouts: &[&str],
        rewrite: bool,
    ) -> (Arc<DryRunConnection>, RecordingObserver, LayoutArbiter) {
        let connection = Arc::new(DryRunConnection::new(layouts));
        connection.add_window(TERM, term(), "session1");
        connection.add_window(
            BROWSER,
            ApplicationIdentity::new("navigator", "Firefox"),
            "Mozilla Firefox",
        );
        connection.add_window(SKIPPED, ApplicationIdentity::new("qxkb5", "Qxkb5"), "tray");

        let observer = RecordingObserver::default();
        let dyn_connection: Arc<dyn DisplayConnection> = connection.clone();
        let arbiter = LayoutArbiter::new(
            dyn_connection,
            Box::new(observer.clone()),
            test_config(rewrite),
        );
        (connection, observer, arbiter)
    }

    fn focus(arbiter: &mut LayoutArbiter, window: WindowId) {
        arbiter
            .handle_notification(Notification::ActiveWindowChanged(window))
            .unwrap();
    }

    fn layout_changed(arbiter: &mut LayoutArbiter, index: usize) {
        arbiter
            .handle_notification(Notification::KeyboardLayoutChanged(index))
            .unwrap();
    }

    #[test]
    fn test_new_identity_gets_live_layout() {
        let (connection, observer, mut arbiter) = setup(&["us", "ru", "de"], false);
        connection.press_group(1);

        focus(&mut arbiter, TERM);

        let entry = arbiter.registry().find(&term()).unwrap();
        assert_eq!(entry.layout, 1);
        assert_eq!(entry.policy, PolicyState::Normal);
        assert!(connection.switch_requests().is_empty());
        assert_eq!(observer.last_icon(), Some(1));
        assert_eq!(arbiter.active_window(), Some(TERM));
    }

    #[test]
    fn test_focus_restores_stored_layout() {
        let (connection, observer, mut arbiter) = setup(&["us", "ru", "de"], false);
        focus(&mut arbiter, TERM);
        layout_changed(&mut arbiter, 2);

        focus(&mut arbiter, BROWSER);
        focus(&mut arbiter, TERM);

        assert_eq!(connection.switch_requests(), vec![2]);
        assert_eq!(observer.last_icon(), Some(2));
    }

    #[test]
    fn test_fixed_lock_reverts_once_without_learning() {
        let (connection, observer, mut arbiter) = setup(&["us", "ru", "de"], false);
        focus(&mut arbiter, TERM);
        arbiter.cycle_policy(&term());
        arbiter.cycle_policy(&term());
        assert_eq!(arbiter.registry().find(&term()).unwrap().policy, PolicyState::FixedLock);
        observer.clear();

        layout_changed(&mut arbiter, 1);

        assert_eq!(connection.switch_requests(), vec![0]);
        assert_eq!(arbiter.registry().find(&term()).unwrap().layout, 0);
        assert_eq!(observer.announces(), 0);
    }

    #[test]
    fn test_normal_learns_and_announces_once() {
        let (_connection, observer, mut arbiter) = setup(&["us", "ru"], false);
        focus(&mut arbiter, TERM);
        observer.clear();

        layout_changed(&mut arbiter, 1);

        assert_eq!(arbiter.registry().find(&term()).unwrap().layout, 1);
        assert_eq!(observer.announces(), 1);
        assert_eq!(observer.last_icon(), Some(1));

        // Совпадающий индекс не озвучивается
        layout_changed(&mut arbiter, 1);
        assert_eq!(observer.announces(), 1);
    }

    #[test]
    fn test_first_lock_announces_every_change() {
        let (_connection, observer, mut arbiter) = setup(&["us", "ru"], false);
        focus(&mut arbiter, TERM);
        assert_eq!(arbiter.cycle_active_policy(), Some(PolicyState::FirstLock));
        observer.clear();

        layout_changed(&mut arbiter, 0);
        layout_changed(&mut arbiter, 1);
        layout_changed(&mut arbiter, 1);

        assert_eq!(observer.announces(), 3);
        assert_eq!(arbiter.registry().find(&term()).unwrap().layout, 1);
    }

    #[test]
    fn test_announce_disabled_in_config() {
        let connection = Arc::new(DryRunConnection::new(&["us", "ru"]));
        connection.add_window(TERM, term(), "session1");
        let observer = RecordingObserver::default();
        let dyn_connection: Arc<dyn DisplayConnection> = connection.clone();
        let mut arbiter = LayoutArbiter::new(
            dyn_connection,
            Box::new(observer.clone()),
            Arc::new(Config::default()),
        );

        focus(&mut arbiter, TERM);
        layout_changed(&mut arbiter, 1);

        assert_eq!(observer.announces(), 0);
        assert_eq!(arbiter.registry().find(&term()).unwrap().layout, 1);
    }

    #[test]
    fn test_layout_change_without_focus_is_ignored() {
        let (_connection, observer, mut arbiter) = setup(&["us", "ru"], false);
        layout_changed(&mut arbiter, 1);

        assert!(arbiter.registry().is_empty());
        assert_eq!(observer.last_icon(), None);
    }

    #[test]
    fn test_each_identity_gets_own_entry() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], false);
        focus(&mut arbiter, TERM);
        connection.add_window(103, ApplicationIdentity::new("gimp", "Gimp"), "GIMP");
        focus(&mut arbiter, 103);
        focus(&mut arbiter, TERM);
        assert!(arbiter
            .registry()
            .find(&ApplicationIdentity::new("gimp", "Gimp"))
            .is_some());
        assert_eq!(arbiter.registry().len(), 2);
    }

    #[test]
    fn test_title_round_trip() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], true);

        focus(&mut arbiter, TERM);
        assert_eq!(connection.title_of(TERM).as_deref(), Some("us: session1"));
        assert_eq!(
            arbiter.registry().find(&term()).unwrap().saved_title.as_deref(),
            Some("session1")
        );

        focus(&mut arbiter, BROWSER);
        assert_eq!(connection.title_of(TERM).as_deref(), Some("session1"));
        assert_eq!(arbiter.registry().find(&term()).unwrap().saved_title, None);
        assert_eq!(connection.mask_of(TERM), Some(WindowEventMask::Disabled));
    }

    #[test]
    fn test_title_follows_layout_change() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], true);
        focus(&mut arbiter, TERM);

        layout_changed(&mut arbiter, 1);
        assert_eq!(connection.title_of(TERM).as_deref(), Some("ru: session1"));

        // Запись заголовка не порождает событий для окна
        assert_eq!(connection.pending_events(), 0);
        assert_eq!(connection.mask_of(TERM), Some(WindowEventMask::PropertyChange));
    }

    #[test]
    fn test_external_title_change_becomes_restore_target() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], true);
        focus(&mut arbiter, TERM);

        connection.retitle(TERM, "session2");
        arbiter
            .handle_notification(Notification::WindowTitleChanged(TERM))
            .unwrap();
        assert_eq!(connection.title_of(TERM).as_deref(), Some("us: session2"));

        // Собственный заголовок не считается внешней сменой
        let writes = connection.title_writes().len();
        arbiter
            .handle_notification(Notification::WindowTitleChanged(TERM))
            .unwrap();
        assert_eq!(connection.title_writes().len(), writes);

        focus(&mut arbiter, BROWSER);
        assert_eq!(connection.title_of(TERM).as_deref(), Some("session2"));
    }

    #[test]
    fn test_failed_title_write_is_not_fatal() {
        let (connection, observer, mut arbiter) = setup(&["us", "ru"], true);
        connection.fail_title_writes(true);

        focus(&mut arbiter, TERM);

        assert_eq!(connection.title_of(TERM).as_deref(), Some("session1"));
        assert_eq!(observer.last_icon(), Some(0));
    }

    #[test]
    fn test_skip_listed_identity_never_registered() {
        let (connection, observer, mut arbiter) = setup(&["us", "ru"], true);

        for _ in 0..3 {
            focus(&mut arbiter, SKIPPED);
            layout_changed(&mut arbiter, 1);
        }

        assert!(arbiter.registry().is_empty());
        assert_eq!(connection.title_of(SKIPPED).as_deref(), Some("tray"));
        assert!(connection.title_writes().is_empty());
        assert_eq!(observer.last_icon(), Some(1));
        assert_eq!(arbiter.cycle_active_policy(), None);
    }

    #[test]
    fn test_empty_identity_is_not_registered() {
        let (_connection, _observer, mut arbiter) = setup(&["us", "ru"], false);
        focus(&mut arbiter, 999);
        layout_changed(&mut arbiter, 1);
        assert!(arbiter.registry().is_empty());
    }

    #[test]
    fn test_switch_next_wraps() {
        let (connection, _observer, arbiter) = setup(&["us", "ru", "de"], false);
        connection.press_group(2);

        assert!(arbiter.switch_next_layout());
        assert_eq!(connection.switch_requests(), vec![0]);
        assert!(arbiter.registry().is_empty());
    }

    #[test]
    fn test_stale_index_clamped_after_map_invalidation() {
        let (connection, observer, mut arbiter) = setup(&["us", "ru", "de"], false);
        focus(&mut arbiter, TERM);
        layout_changed(&mut arbiter, 2);
        focus(&mut arbiter, BROWSER);

        connection.replace_layouts(&["us", "ru"]);
        arbiter
            .handle_notification(Notification::KeyboardMapInvalidated(
                MapInvalidation::MapChanged,
            ))
            .unwrap();
        assert!(observer
            .log
            .lock()
            .contains(&Observed::Names(vec!["us".to_string(), "ru".to_string()])));
        // Индексы не переписываются при перечитывании
        assert_eq!(arbiter.registry().find(&term()).unwrap().layout, 2);

        focus(&mut arbiter, TERM);
        assert_eq!(arbiter.registry().find(&term()).unwrap().layout, 0);
        assert_eq!(observer.last_icon(), Some(0));
    }

    #[test]
    fn test_snapshot_load_and_view() {
        let (_connection, _observer, mut arbiter) = setup(&["us", "ru"], false);
        arbiter.load_snapshot(&[
            RegistryRecord {
                instance: "Term".to_string(),
                class: "xterm".to_string(),
                layout: 1,
                policy: PolicyState::FixedLock,
                label: None,
            },
            RegistryRecord {
                instance: "navigator".to_string(),
                class: "Firefox".to_string(),
                layout: 7,
                policy: PolicyState::FirstLock,
                label: None,
            },
            RegistryRecord {
                instance: "qxkb5".to_string(),
                class: "Qxkb5".to_string(),
                layout: 1,
                policy: PolicyState::Normal,
                label: None,
            },
        ]);

        let snapshot = arbiter.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].layout, 1);
        assert_eq!(snapshot[0].label.as_deref(), Some("ru"));
        assert_eq!(snapshot[0].policy.label(), "fixed");
        assert_eq!(snapshot[1].layout, 0);
        assert_eq!(snapshot[1].label.as_deref(), Some("us"));
    }

    #[test]
    fn test_preset_fixed_lock_applies_on_focus() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], false);
        arbiter.load_snapshot(&[RegistryRecord {
            instance: "Term".to_string(),
            class: "xterm".to_string(),
            layout: 1,
            policy: PolicyState::FixedLock,
            label: None,
        }]);

        focus(&mut arbiter, TERM);
        assert_eq!(connection.switch_requests(), vec![1]);
    }

    #[test]
    fn test_restore_active_title_on_exit() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], true);
        focus(&mut arbiter, TERM);
        assert_eq!(connection.title_of(TERM).as_deref(), Some("us: session1"));

        arbiter.restore_active_title();
        assert_eq!(connection.title_of(TERM).as_deref(), Some("session1"));
    }

    #[test]
    fn test_connection_lost_is_error() {
        let (_connection, _observer, mut arbiter) = setup(&["us"], false);
        let result = arbiter.handle_notification(Notification::ConnectionLost);
        assert!(matches!(result, Err(KeeperError::ConnectionLost)));
    }

    #[test]
    fn test_failed_layout_refresh_keeps_learned_layouts() {
        let (connection, observer, mut arbiter) = setup(&["us", "ru", "de"], false);
        focus(&mut arbiter, TERM);
        layout_changed(&mut arbiter, 2);
        focus(&mut arbiter, BROWSER);

        // Пустой список имён, как при сбое xkb_get_names
        connection.replace_layouts(&[]);
        arbiter
            .handle_notification(Notification::KeyboardMapInvalidated(
                MapInvalidation::MapChanged,
            ))
            .unwrap();
        assert!(!observer.log.lock().contains(&Observed::Names(Vec::new())));

        focus(&mut arbiter, TERM);
        assert_eq!(arbiter.registry().find(&term()).unwrap().layout, 2);

        connection.replace_layouts(&["us", "ru", "de"]);
        arbiter
            .handle_notification(Notification::KeyboardMapInvalidated(
                MapInvalidation::MapChanged,
            ))
            .unwrap();
        focus(&mut arbiter, BROWSER);
        focus(&mut arbiter, TERM);

        assert_eq!(arbiter.registry().find(&term()).unwrap().layout, 2);
        assert_eq!(observer.last_icon(), Some(2));
    }

    #[test]
    fn test_identity_resolved_on_layout_change() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], false);
        let gimp = ApplicationIdentity::new("gimp", "Gimp");

        // WM_CLASS ещё не доступен в момент фокуса
        focus(&mut arbiter, 200);
        assert!(arbiter.registry().is_empty());

        connection.add_window(200, gimp.clone(), "GIMP");
        layout_changed(&mut arbiter, 1);

        let entry = arbiter.registry().find(&gimp).unwrap();
        assert_eq!(entry.layout, 1);
        assert_eq!(entry.policy, PolicyState::Normal);
        assert_eq!(arbiter.cycle_active_policy(), Some(PolicyState::FirstLock));
    }

    #[test]
    fn test_title_change_of_unfocused_window_is_ignored() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], true);
        focus(&mut arbiter, TERM);
        let writes = connection.title_writes().len();

        connection.retitle(BROWSER, "Other page");
        arbiter
            .handle_notification(Notification::WindowTitleChanged(BROWSER))
            .unwrap();

        assert_eq!(connection.title_writes().len(), writes);
        assert_eq!(connection.title_of(BROWSER).as_deref(), Some("Other page"));
        assert_eq!(
            arbiter.registry().find(&term()).unwrap().saved_title.as_deref(),
            Some("session1")
        );
        assert!(arbiter
            .registry()
            .find(&ApplicationIdentity::new("navigator", "Firefox"))
            .is_none());
    }

    #[test]
    fn test_rewrite_disabled_never_writes_titles() {
        let (connection, _observer, mut arbiter) = setup(&["us", "ru"], false);

        focus(&mut arbiter, TERM);
        layout_changed(&mut arbiter, 1);
        connection.retitle(TERM, "session2");
        arbiter
            .handle_notification(Notification::WindowTitleChanged(TERM))
            .unwrap();
        focus(&mut arbiter, BROWSER);
        arbiter.restore_active_title();

        assert!(connection.title_writes().is_empty());
        assert_eq!(connection.title_of(TERM).as_deref(), Some("session2"));
        assert_eq!(arbiter.registry().find(&term()).unwrap().saved_title, None);
    }
}
