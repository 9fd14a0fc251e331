//! Definição de tipos para telemetria enviada ao display serial.
//!
//! Uma [`Sample`] é a leitura de um tick do sampler; ela é codificada em
//! pacotes pelo [`crate::protocol`] e descartada logo em seguida.

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Contadores de rede
// ──────────────────────────────────────────────

/// Contadores cumulativos de bytes, somados em todas as interfaces
/// exceto loopback.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetCounters {
    /// Bytes transmitidos desde o boot
    pub tx: u64,
    /// Bytes recebidos desde o boot
    pub rx: u64,
}

impl NetCounters {
    /// Delta em relação a uma leitura anterior.
    ///
    /// Contadores que regridem (interface removida, wrap do kernel)
    /// produzem delta zero em vez de estourar.
    pub fn delta_since(&self, previous: &NetCounters) -> (u64, u64) {
        (
            self.tx.saturating_sub(previous.tx),
            self.rx.saturating_sub(previous.rx),
        )
    }
}

// ──────────────────────────────────────────────
// Sample
// ──────────────────────────────────────────────

/// Leitura pontual de um tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Uso por core lógico (0–100%), na ordem do índice do core
    pub cpu_loads: Vec<f32>,
    /// Bytes transmitidos desde o tick anterior
    pub net_tx_delta: u64,
    /// Bytes recebidos desde o tick anterior
    pub net_rx_delta: u64,
}

impl Sample {
    /// Mantém apenas os primeiros `max_cores` cores (0 = todos).
    pub fn truncate_cores(mut self, max_cores: usize) -> Self {
        if max_cores > 0 {
            self.cpu_loads.truncate(max_cores);
        }
        self
    }
}

// ──────────────────────────────────────────────
// Tipos de pacote
// ──────────────────────────────────────────────

/// Tipo semântico de um pacote no fio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketKind {
    /// Reinicializa o estado do display
    Reset = 0,
    /// Barras de CPU (mapeamento quadrático)
    CpuBars = 1,
    /// Barras de rede (tx, rx)
    NetBars = 2,
    /// CPU linear + quatro níveis de rede
    Combined = 3,
}

impl TryFrom<u8> for PacketKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketKind::Reset),
            1 => Ok(PacketKind::CpuBars),
            2 => Ok(PacketKind::NetBars),
            3 => Ok(PacketKind::Combined),
            other => Err(other),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(kind: PacketKind) -> u8 {
        kind as u8
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
