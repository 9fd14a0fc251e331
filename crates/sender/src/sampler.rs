//! Samplers periódicos: métricas → pacotes → fila.
//!
//! Cada variante roda na sua própria thread com seus próprios contadores de
//! rede. Nenhum sampler toca o dispositivo serial nem conhece o estado da
//! conexão; eles seguem amostrando enquanto a sessão reconecta.

use crate::monitor::{MetricsError, MetricsSource};
use crate::queue::{Enqueued, PacketSender, QueueClosed};
use crate::shutdown::Shutdown;
use std::time::{Duration, Instant};
use telemetry_core::{
    BarSamplerConfig, CombinedSamplerConfig, NetCounters, Packet, Sample, encode_combined,
    encode_cpu_bars, encode_net_bars,
};
use tracing::{debug, info, trace};

/// Quais pacotes uma variante produz a cada tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerVariant {
    /// Barras de CPU (quadráticas) seguidas das barras de rede
    Bars { net_scale: u64 },
    /// Pacote combinado com níveis "byte" e "word"
    Combined { byte_scale: u64, word_scale: u64 },
}

impl SamplerVariant {
    pub fn name(&self) -> &'static str {
        match self {
            SamplerVariant::Bars { .. } => "bars",
            SamplerVariant::Combined { .. } => "combined",
        }
    }

    pub fn encode(&self, sample: &Sample) -> Vec<Packet> {
        match *self {
            SamplerVariant::Bars { net_scale } => vec![
                encode_cpu_bars(&sample.cpu_loads),
                encode_net_bars(sample.net_tx_delta, sample.net_rx_delta, net_scale),
            ],
            SamplerVariant::Combined {
                byte_scale,
                word_scale,
            } => {
                let byte_scale = byte_scale.max(1);
                let word_scale = word_scale.max(1);
                vec![encode_combined(
                    &sample.cpu_loads,
                    sample.net_tx_delta / byte_scale,
                    sample.net_rx_delta / byte_scale,
                    sample.net_tx_delta / word_scale,
                    sample.net_rx_delta / word_scale,
                )]
            }
        }
    }
}

/// Ritmo de um sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerSettings {
    pub interval: Duration,
    /// Janela bloqueante de medição de CPU (consome a maior parte do tick)
    pub cpu_window: Duration,
    /// 0 = todos os cores
    pub max_cores: usize,
}

pub struct Sampler<M: MetricsSource> {
    source: M,
    variant: SamplerVariant,
    settings: SamplerSettings,
    prev: Option<NetCounters>,
}

impl<M: MetricsSource> Sampler<M> {
    pub fn new(source: M, variant: SamplerVariant, settings: SamplerSettings) -> Self {
        Self {
            source,
            variant,
            settings,
            prev: None,
        }
    }

    pub fn bars(source: M, config: &BarSamplerConfig) -> Self {
        Self::new(
            source,
            SamplerVariant::Bars {
                net_scale: config.net_scale,
            },
            SamplerSettings {
                interval: Duration::from_secs_f64(config.interval_secs),
                cpu_window: Duration::from_secs_f64(config.cpu_window_secs),
                max_cores: config.max_cores,
            },
        )
    }

    pub fn combined(source: M, config: &CombinedSamplerConfig) -> Self {
        Self::new(
            source,
            SamplerVariant::Combined {
                byte_scale: config.byte_scale,
                word_scale: config.word_scale,
            },
            SamplerSettings {
                interval: Duration::from_secs_f64(config.interval_secs),
                cpu_window: Duration::from_secs_f64(config.cpu_window_secs),
                max_cores: config.max_cores,
            },
        )
    }

    pub fn name(&self) -> &'static str {
        self.variant.name()
    }

    /// Última leitura cumulativa guardada.
    pub fn last_counters(&self) -> Option<NetCounters> {
        self.prev
    }

    /// Lê CPU e rede e calcula os deltas desde o tick anterior.
    ///
    /// O primeiro tick só registra os contadores e reporta delta zero.
    pub fn sample(&mut self) -> Result<Sample, MetricsError> {
        let cpu_loads = self.source.cpu_percent(self.settings.cpu_window)?;
        let now = self.source.net_counters()?;

        let (net_tx_delta, net_rx_delta) = match self.prev {
            Some(prev) => now.delta_since(&prev),
            None => (0, 0),
        };
        self.prev = Some(now);

        let sample = Sample {
            cpu_loads,
            net_tx_delta,
            net_rx_delta,
        };
        Ok(sample.truncate_cores(self.settings.max_cores))
    }

    /// Loop do sampler. Retorna `Ok` no encerramento ou quando a fila fecha;
    /// `Err` quando a leitura de métricas falha.
    pub fn run(&mut self, queue: &PacketSender, shutdown: &Shutdown) -> Result<(), MetricsError> {
        info!(
            "Sampler {} iniciado (intervalo {:.2}s, janela de CPU {:.2}s)",
            self.name(),
            self.settings.interval.as_secs_f64(),
            self.settings.cpu_window.as_secs_f64()
        );

        while !shutdown.is_triggered() {
            let cycle_start = Instant::now();

            let sample = self.sample()?;
            trace!(
                "{}: CPU {:?} | NET [TX {} | {} RX]",
                self.name(),
                sample.cpu_loads,
                sample.net_tx_delta,
                sample.net_rx_delta
            );

            if let Err(QueueClosed) = self.publish(queue, &sample) {
                info!("Sampler {}: fila fechada, encerrando", self.name());
                return Ok(());
            }

            // Dormir pelo tempo restante do intervalo
            let remaining = self.settings.interval.saturating_sub(cycle_start.elapsed());
            if shutdown.wait_timeout(remaining) {
                break;
            }
        }

        info!(
            "Sampler {} encerrado (últimos contadores: {:?})",
            self.name(),
            self.last_counters()
        );
        Ok(())
    }

    fn publish(&self, queue: &PacketSender, sample: &Sample) -> Result<(), QueueClosed> {
        for packet in self.variant.encode(sample) {
            if queue.enqueue(packet)? == Enqueued::DroppedOldest {
                debug!(
                    "Fila cheia: pacote mais antigo descartado ({} no total)",
                    queue.dropped()
                );
            }
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
