//! Hardware Monitor – fonte de métricas de CPU e rede.
//!
//! - `sysinfo` — uso por core (janela bloqueante) e bytes de rede
//! - Loopback fica de fora da soma de rede

use std::time::Duration;
use sysinfo::{CpuRefreshKind, Networks, RefreshKind, System};
use telemetry_core::NetCounters;
use tracing::{debug, info};

/// Falha de leitura de métricas. Fatal apenas para o sampler que a recebe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
    #[error("Plataforma não suportada pelo sysinfo")]
    Unsupported,

    #[error("Nenhuma CPU reportada pelo sistema")]
    NoCpus,
}

/// Fonte de métricas usada pelos samplers.
pub trait MetricsSource {
    /// Uso por core (0–100%) medido ao longo de `window`. Bloqueia.
    fn cpu_percent(&mut self, window: Duration) -> Result<Vec<f32>, MetricsError>;

    /// Contadores cumulativos de rede, sem loopback.
    fn net_counters(&mut self) -> Result<NetCounters, MetricsError>;
}

/// Monitor de hardware baseado em `sysinfo`.
pub struct HardwareMonitor {
    sys: System,
    networks: Networks,
}

impl HardwareMonitor {
    pub fn new() -> Result<Self, MetricsError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(MetricsError::Unsupported);
        }

        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        if sys.cpus().is_empty() {
            return Err(MetricsError::NoCpus);
        }

        let networks = Networks::new_with_refreshed_list();
        info!(
            "Hardware monitor: {} cores, {} interfaces",
            sys.cpus().len(),
            networks.iter().filter(|(name, _)| !is_loopback(name)).count()
        );

        Ok(Self { sys, networks })
    }
}

impl MetricsSource for HardwareMonitor {
    fn cpu_percent(&mut self, window: Duration) -> Result<Vec<f32>, MetricsError> {
        // Abaixo do mínimo o sysinfo devolve uso zerado/instável.
        let window = window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);

        self.sys.refresh_cpu_usage();
        std::thread::sleep(window);
        self.sys.refresh_cpu_usage();

        let loads: Vec<f32> = self.sys.cpus().iter().map(|cpu| cpu.cpu_usage()).collect();
        if loads.is_empty() {
            return Err(MetricsError::NoCpus);
        }
        Ok(loads)
    }

    fn net_counters(&mut self) -> Result<NetCounters, MetricsError> {
        self.networks.refresh(true);

        let mut counters = NetCounters::default();
        for (name, data) in self.networks.iter() {
            if is_loopback(name) {
                continue;
            }
            counters.tx = counters.tx.saturating_add(data.total_transmitted());
            counters.rx = counters.rx.saturating_add(data.total_received());
        }

        debug!("NET total [TX {} | {} RX]", counters.tx, counters.rx);
        Ok(counters)
    }
}

/// `lo` (Linux), `lo0` (BSD/macOS), "Loopback Pseudo-Interface" (Windows).
fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_lowercase().contains("loopback")
}
