use crate::debug_if_enabled;
use crate::events::{DisplayEvent, MapInvalidation, Notification, WatchedProperty};
use crate::services::connection::DisplayConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

/// Выбирает события из очереди соединения и превращает их в уведомления.
///
/// Не блокируется на пустой очереди: выбирает всё, что есть, и засыпает на
/// `poll_interval`. Флаг остановки проверяется один раз за итерацию.
pub struct EventPump {
    connection: Arc<dyn DisplayConnection>,
    sender: UnboundedSender<Notification>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

/// Владелец запущенного EventPump
pub struct EventPumpHandle {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl EventPump {
    pub fn new(
        connection: Arc<dyn DisplayConnection>,
        sender: UnboundedSender<Notification>,
        poll_interval: Duration,
    ) -> Self {
        info!("Инициализация EventPump (интервал опроса: {:?})", poll_interval);
        Self {
            connection,
            sender,
            shutdown: Arc::new(AtomicBool::new(false)),
            poll_interval,
        }
    }

    pub fn spawn(self) -> EventPumpHandle {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = tokio::spawn(self.run());
        EventPumpHandle { handle, shutdown }
    }

    async fn run(self) {
        info!("EventPump запущен");

        // Арбитр не должен пропустить окно, которое уже в фокусе
        if let Some(window) = self.connection.active_window() {
            if !self.emit(Notification::ActiveWindowChanged(window)) {
                return;
            }
        }

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("EventPump получил запрос остановки");
                break;
            }

            if !self.connection.is_healthy() {
                warn!("Соединение с X сервером потеряно, EventPump завершается");
                self.emit(Notification::ConnectionLost);
                break;
            }

            if !self.drain() {
                info!("Получатель уведомлений закрыт, EventPump завершается");
                break;
            }

            // Небольшая задержка для предотвращения 100% загрузки CPU
            sleep(self.poll_interval).await;
        }

        info!("EventPump остановлен");
    }

    /// Выбрать все события из очереди; false, если получатель закрыт
    pub fn drain(&self) -> bool {
        loop {
            match self.connection.poll_event() {
                Ok(Some(event)) => {
                    if !self.handle_event(event) {
                        return false;
                    }
                }
                Ok(None) => return true,
                Err(e) => {
                    // Соединение уже помечено как потерянное, итог решит начало цикла
                    warn!("Ошибка чтения событий: {}", e);
                    return true;
                }
            }
        }
    }

    fn handle_event(&self, event: DisplayEvent) -> bool {
        debug_if_enabled!("Событие X11: {:?}", event);

        match event {
            DisplayEvent::PropertyChanged {
                window,
                property: WatchedProperty::ActiveWindow,
            } if window == self.connection.root_window() => {
                match self.connection.active_window() {
                    Some(active) => self.emit(Notification::ActiveWindowChanged(active)),
                    None => true,
                }
            }
            DisplayEvent::PropertyChanged {
                window,
                property: WatchedProperty::WindowName,
            } if window != self.connection.root_window() => {
                self.emit(Notification::WindowTitleChanged(window))
            }
            DisplayEvent::MapChanged => self.invalidate(MapInvalidation::MapChanged),
            DisplayEvent::NewKeyboard {
                device_id,
                keycodes_changed: true,
            } if device_id == self.connection.keyboard_device_id() => {
                self.invalidate(MapInvalidation::NewKeyboard { device_id })
            }
            DisplayEvent::StateChanged {
                state,
                group_changed,
            } => {
                self.connection.update_keyboard_state(state);
                if group_changed {
                    self.emit(Notification::KeyboardLayoutChanged(state.group as usize))
                } else {
                    true
                }
            }
            _ => true,
        }
    }

    fn invalidate(&self, reason: MapInvalidation) -> bool {
        info!("Карта клавиатуры устарела: {}", reason);
        if let Err(e) = self.connection.rebuild_keyboard() {
            warn!("Не удалось пересобрать карту клавиатуры: {}", e);
        }
        self.emit(Notification::KeyboardMapInvalidated(reason))
    }

    fn emit(&self, notification: Notification) -> bool {
        debug_if_enabled!("Уведомление: {:?}", notification);
        self.sender.send(notification).is_ok()
    }
}

impl EventPumpHandle {
    /// Попросить остановиться и ждать не дольше `grace`, потом прервать задачу.
    /// Возвращает true, если EventPump завершился сам.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.shutdown.store(true, Ordering::SeqCst);

        let mut handle = self.handle;
        match timeout(grace, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!("EventPump не остановился за {:?}, прерываем", grace);
                handle.abort();
                false
            }
        }
    }
}
