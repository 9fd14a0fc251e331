//! # Telemetria Serial
//!
//! Amostra uso de CPU por core e tráfego de rede e envia pacotes binários
//! pela serial para um display de barras de LED.
//!
//! ## Uso
//! ```bash
//! telemetry_serial /dev/ttyUSB0
//! telemetry_serial /dev/ttyACM0 --baud 115200 --interval 0.5 --net-scale 4096
//! RUST_LOG=trace telemetry_serial /dev/ttyUSB0   # loga cada pacote enviado
//! ```

mod monitor;
mod queue;
mod sampler;
mod session;
mod shutdown;
mod transport;

use clap::Parser;
use monitor::{HardwareMonitor, MetricsError};
use queue::{PacketSender, packet_queue};
use sampler::Sampler;
use session::{Backoff, SessionManager};
use shutdown::{Shutdown, shutdown_channel};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::JoinHandle;
use telemetry_core::config::AppConfig;
use tracing::{error, info, warn};
use transport::SerialConnector;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Envia carga de CPU e rede para um display de LED via serial",
    long_about = None
)]
struct Args {
    /// Dispositivo serial (ex: /dev/ttyUSB0)
    #[arg(value_name = "DEVICE")]
    device: String,

    /// Baud rate (sobrescreve o config)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Intervalo do sampler de barras, em segundos
    #[arg(short, long, value_name = "SECS")]
    interval: Option<f64>,

    /// Divisor de bytes por nível das barras de rede
    #[arg(short = 's', long)]
    net_scale: Option<u64>,

    /// Arquivo de configuração (padrão: config.toml ao lado do executável)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging detalhado
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // ── Logging ──
    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    // ── Carregar config ──
    let config = load_config(&args);
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Configuração inválida: {e}");
        }
        return ExitCode::FAILURE;
    }

    run(config)
}

fn load_config(args: &Args) -> AppConfig {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path),
        None => {
            let path = AppConfig::default_path();
            let config = AppConfig::load(&path);
            // Salva config padrão se não existir
            if !path.exists() {
                if let Err(e) = config.save(&path) {
                    warn!("Não foi possível salvar config padrão: {e}");
                }
            }
            config
        }
    };

    config.serial.device = args.device.clone();
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(interval) = args.interval {
        config.bars.interval_secs = interval;
        config.bars.cpu_window_secs = config.bars.cpu_window_secs.min(interval);
    }
    if let Some(scale) = args.net_scale {
        config.bars.net_scale = scale;
    }
    config
}

fn run(config: AppConfig) -> ExitCode {
    let (trigger, shutdown) = shutdown_channel();
    let trigger = Arc::new(trigger);
    {
        let trigger = trigger.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Ctrl+C recebido, encerrando...");
            trigger.trigger();
        }) {
            warn!("Falha ao registrar handler de Ctrl+C: {e}");
        }
    }

    let (tx, rx) = packet_queue(config.serial.queue_capacity);

    // ── Samplers ──
    let mut samplers = Vec::new();
    if config.bars.enabled {
        let cfg = config.bars.clone();
        samplers.push(spawn_sampler(
            "bars",
            move |m| Sampler::bars(m, &cfg),
            tx.clone(),
            shutdown.clone(),
        ));
    }
    if config.combined.enabled {
        let cfg = config.combined.clone();
        samplers.push(spawn_sampler(
            "combined",
            move |m| Sampler::combined(m, &cfg),
            tx.clone(),
            shutdown.clone(),
        ));
    }
    // A fila fecha quando o último sampler terminar.
    drop(tx);

    let samplers: Vec<(&str, JoinHandle<Result<(), MetricsError>>)> =
        match samplers.into_iter().collect::<std::io::Result<Vec<_>>>() {
            Ok(handles) => handles,
            Err(e) => {
                error!("Falha ao criar thread de sampler: {e}");
                trigger.trigger();
                return ExitCode::FAILURE;
            }
        };

    // ── Sessão serial ──
    let serial = &config.serial;
    let connector = SerialConnector::new(&serial.device, serial.baud_rate, serial.write_timeout());
    let backoff = Backoff::new(serial.retry_initial(), serial.retry_max());
    let mut manager = SessionManager::new(connector, rx, shutdown.clone(), backoff);

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ TELEMETRIA SERIAL – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Dispositivo: {} @ {} baud", serial.device, serial.baud_rate);
    println!("  Samplers:    {}", samplers.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", "));
    println!("  Fila:        {} pacotes", serial.queue_capacity);
    println!("══════════════════════════════════════════════");
    println!();

    let session = std::thread::Builder::new()
        .name("serial-session".into())
        .spawn(move || {
            let result = manager.run();
            info!("Estado final da sessão: {:?}", manager.state());
            (result, manager.stats().clone())
        });

    let mut exit = ExitCode::SUCCESS;
    match session.map(JoinHandle::join) {
        Ok(Ok((result, stats))) => {
            info!(
                "Sessão: {} conexões em {} tentativas, {} pacotes, {} falhas de escrita",
                stats.sessions, stats.connect_attempts, stats.packets_sent, stats.write_failures
            );
            if let Err(e) = result {
                error!("Sessão serial falhou: {e}");
                exit = ExitCode::FAILURE;
            }
        }
        Ok(Err(_)) => {
            error!("Thread da sessão serial terminou com panic");
            exit = ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Falha ao criar thread da sessão serial: {e}");
            exit = ExitCode::FAILURE;
        }
    }

    // Sessão terminou (Ctrl+C ou falha): para os samplers que restam.
    trigger.trigger();
    for (name, handle) in samplers {
        if handle.join().is_err() {
            error!("Thread do sampler {name} terminou com panic");
        }
    }

    exit
}

/// Sobe um sampler na sua própria thread com um monitor dedicado.
///
/// Uma falha de métricas encerra só esta thread; as outras seguem.
fn spawn_sampler<F>(
    name: &'static str,
    build: F,
    queue: PacketSender,
    shutdown: Shutdown,
) -> std::io::Result<(&'static str, JoinHandle<Result<(), MetricsError>>)>
where
    F: FnOnce(HardwareMonitor) -> Sampler<HardwareMonitor> + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name(format!("sampler-{name}"))
        .spawn(move || {
            let result = HardwareMonitor::new().and_then(|monitor| {
                let mut sampler = build(monitor);
                sampler.run(&queue, &shutdown)
            });
            if let Err(e) = &result {
                error!("Sampler {name}: falha de leitura de métricas: {e}");
            }
            result
        })?;
    Ok((name, handle))
}
