use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::Config;
use services::{create_connection, EventPump, LayoutArbiter, TracingObserver};
use utils::InstanceLock;

#[derive(Parser, Debug)]
#[command(name = "layout-keeper")]
#[command(about = "Запоминает раскладку клавиатуры для каждого приложения X11")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "layout-keeper.toml")]
    config: String,

    /// Режим сухого запуска (без X сервера)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает logging.filter из конфигурации)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Arc::new(Config::load(&args.config)?);

    // Инициализация системы логирования
    let level = args.log_level.clone().unwrap_or_else(|| {
        if config.logging.filter.is_empty() {
            config.logging.level.clone()
        } else {
            config.logging.filter.clone()
        }
    });
    init_tracing(&level, &config.logging.format)?;

    info!("Запуск layout-keeper v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - X сервер не используется");
    }

    // Один демон на пользователя, dry-run блокировку не берёт
    let _instance_lock = if args.dry_run {
        None
    } else {
        Some(InstanceLock::acquire_default()?)
    };

    // Инициализация компонентов
    let connection = create_connection(&config, args.dry_run)?;
    let observer = Box::new(TracingObserver::new(&config.notify));
    let mut arbiter = LayoutArbiter::new(connection.clone(), observer, config.clone());
    arbiter.load_snapshot(&config.windows.presets);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pump = EventPump::new(
        connection,
        tx,
        Duration::from_millis(config.connection.poll_interval_ms),
    )
    .spawn();

    info!("Все сервисы запущены");

    let mut next_layout = unix_signal(SignalKind::user_defined1())?;
    let mut cycle_policy = unix_signal(SignalKind::user_defined2())?;
    let mut terminate = unix_signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            notification = rx.recv() => {
                let Some(notification) = notification else {
                    warn!("EventPump завершился");
                    break;
                };
                if let Err(e) = arbiter.handle_notification(notification) {
                    if e.is_connection_lost() {
                        error!("{}", e);
                        break;
                    }
                    warn!("Ошибка обработки уведомления: {}", e);
                }
            }
            _ = next_layout.recv() => {
                info!("SIGUSR1: следующая раскладка");
                if !arbiter.switch_next_layout() {
                    warn!("Не удалось переключить раскладку");
                }
            }
            _ = cycle_policy.recv() => {
                match arbiter.cycle_active_policy() {
                    Some(policy) => info!("SIGUSR2: новая политика {}", policy),
                    None => info!("SIGUSR2: нет приложения для смены политики"),
                }
            }
            _ = terminate.recv() => {
                info!("Получен сигнал завершения (SIGTERM)");
                break;
            }
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                    Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
                }
                break;
            }
        }
    }

    info!("Завершение работы...");

    // Заголовок возвращаем до остановки EventPump, пока соединение живо
    arbiter.restore_active_title();

    for record in arbiter.snapshot() {
        info!(
            "Реестр: {}/{} -> #{} {} [{}]",
            record.instance,
            record.class,
            record.layout,
            record.label.as_deref().unwrap_or("?"),
            record.policy
        );
    }

    let shutdown_timeout = Duration::from_millis(config.connection.shutdown_timeout_ms);
    if pump.shutdown(shutdown_timeout).await {
        info!("EventPump завершил работу корректно");
    } else {
        warn!("Таймаут при завершении EventPump");
    }

    info!("layout-keeper завершил работу");
    Ok(())
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    Ok(())
}
