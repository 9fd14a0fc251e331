//! # Telemetry Core
//!
//! Crate compartilhada que define os tipos de telemetria, o codec binário
//! dos pacotes enviados ao display serial e a configuração TOML.
//!
//! ## Módulos
//! - [`types`] – Sample, contadores de rede e tipos de pacote
//! - [`protocol`] – Encoders `[tipo][tamanho][payload]` e decoder de stream
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod config;

// Re-exports convenientes
pub use types::{NetCounters, PacketKind, Sample};
pub use protocol::{
    Packet, ProtocolError, encode_combined, encode_cpu_bars, encode_net_bars, encode_reset,
};
pub use config::{AppConfig, BarSamplerConfig, CombinedSamplerConfig, SerialConfig};
