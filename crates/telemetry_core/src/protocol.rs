//! Protocolo binário host → display.
//!
//! Formato do frame:
//!
//! ```text
//! ┌─────────┬───────────┬──────────────────┐
//! │ Tipo(1) │ Tamanho(1)│ Payload (Tamanho) │
//! └─────────┴───────────┴──────────────────┘
//! ```
//!
//! - Frames são concatenados sem delimitador; o receptor acompanha as
//!   fronteiras apenas pelo byte de tamanho.
//! - Todo byte de payload é um nível `u8` já saturado em `[0, 255]`.
//! - O mapeamento quadrático (barras de CPU) e o linear (pacote combinado)
//!   são operações distintas: o display usa o quadrático para concentrar
//!   resolução na parte baixa, onde o LED é mais sensível.

use crate::types::PacketKind;

/// Tamanho do header (tipo + tamanho).
pub const HEADER_SIZE: usize = 2;

/// Maior payload representável pelo byte de tamanho.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Buffer de payload do firmware de referência (Arduino).
pub const DEVICE_MAX_PAYLOAD: usize = 32;

/// Valor máximo de uma barra.
const BAR_MAX: f64 = 255.0;

/// Níveis de rede extras no pacote combinado.
const COMBINED_NET_LEVELS: usize = 4;

/// Erros do protocolo.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Tipo de pacote desconhecido: 0x{0:02X}")]
    UnknownKind(u8),

    #[error("Tamanho declarado {declared} difere do payload ({actual} bytes)")]
    LengthMismatch { declared: usize, actual: usize },
}

// ──────────────────────────────────────────────
// Packet
// ──────────────────────────────────────────────

/// Frame imutável `[tipo][tamanho][payload]`.
///
/// Só é construído pelo codec (ou por [`Packet::parse`]), então o byte de
/// tamanho sempre confere com o payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    fn new(kind: PacketKind, payload: &[u8]) -> Self {
        let payload = &payload[..payload.len().min(MAX_PAYLOAD)];
        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.push(kind.into());
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    /// Valida um único frame completo.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::TooShort(data.len()));
        }
        let kind = PacketKind::try_from(data[0]).map_err(ProtocolError::UnknownKind)?;
        let declared = data[1] as usize;
        let actual = data.len() - HEADER_SIZE;
        if declared != actual {
            return Err(ProtocolError::LengthMismatch { declared, actual });
        }
        Ok(Self::new(kind, &data[HEADER_SIZE..]))
    }

    pub fn kind(&self) -> PacketKind {
        // O primeiro byte sempre vem de um PacketKind.
        PacketKind::try_from(self.bytes[0]).unwrap_or(PacketKind::Reset)
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    /// Bytes exatamente como vão para o fio.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Tamanho total no fio (`2 + tamanho`), nunca zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

// ──────────────────────────────────────────────
// Mapeamentos de nível
// ──────────────────────────────────────────────

fn clamp_percent(x: f32) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        (x as f64).clamp(0.0, 100.0)
    }
}

/// `round((x/100)^2 * 255)`, saturado em `[0, 255]`.
pub fn cpu_level_squared(percent: f32) -> u8 {
    let ratio = clamp_percent(percent) / 100.0;
    (ratio * ratio * BAR_MAX).round().clamp(0.0, BAR_MAX) as u8
}

/// `round((x/100) * 255)`, saturado em `[0, 255]`.
pub fn cpu_level_linear(percent: f32) -> u8 {
    let ratio = clamp_percent(percent) / 100.0;
    (ratio * BAR_MAX).round().clamp(0.0, BAR_MAX) as u8
}

/// `min(floor(delta / scale), 255)`. Escala zero é tratada como 1.
pub fn net_level(delta: u64, scale: u64) -> u8 {
    clamp_level(delta / scale.max(1))
}

fn clamp_level(level: u64) -> u8 {
    level.min(u8::MAX as u64) as u8
}

// ──────────────────────────────────────────────
// Encoders
// ──────────────────────────────────────────────

/// Pacote de reset `[0, 0]`, enviado uma vez a cada conexão.
pub fn encode_reset() -> Packet {
    Packet::new(PacketKind::Reset, &[])
}

/// Barras de CPU com peso quadrático, um byte por core.
pub fn encode_cpu_bars(loads: &[f32]) -> Packet {
    let payload: Vec<u8> = loads.iter().map(|&x| cpu_level_squared(x)).collect();
    Packet::new(PacketKind::CpuBars, &payload)
}

/// Barras de rede na ordem (tx, rx).
pub fn encode_net_bars(tx_delta: u64, rx_delta: u64, scale: u64) -> Packet {
    Packet::new(
        PacketKind::NetBars,
        &[net_level(tx_delta, scale), net_level(rx_delta, scale)],
    )
}

/// CPU linear seguida de quatro níveis de rede já escalados pelo chamador.
///
/// Se houver cores demais para o byte de tamanho, os últimos são
/// descartados para que os níveis de rede sempre caibam.
pub fn encode_combined(
    loads: &[f32],
    tx_byte_level: u64,
    rx_byte_level: u64,
    tx_word_level: u64,
    rx_word_level: u64,
) -> Packet {
    let cores = loads.len().min(MAX_PAYLOAD - COMBINED_NET_LEVELS);
    let mut payload = Vec::with_capacity(cores + COMBINED_NET_LEVELS);
    payload.extend(loads[..cores].iter().map(|&x| cpu_level_linear(x)));
    payload.extend(
        [tx_byte_level, rx_byte_level, tx_word_level, rx_word_level]
            .into_iter()
            .map(clamp_level),
    );
    Packet::new(PacketKind::Combined, &payload)
}

// ──────────────────────────────────────────────
// Decoder de stream (lado do display)
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeStep {
    Kind,
    Length,
    Payload,
}

/// Remonta frames a partir de um stream de bytes, como o firmware faz.
///
/// Bytes que não são um tipo conhecido são ignorados enquanto se procura o
/// início de um frame; tamanhos acima de `max_payload` descartam o frame.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    step: DecodeStep,
    kind: PacketKind,
    expected: usize,
    buffer: Vec<u8>,
    max_payload: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD)
    }
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            step: DecodeStep::Kind,
            kind: PacketKind::Reset,
            expected: 0,
            buffer: Vec::with_capacity(max_payload),
            max_payload,
        }
    }

    /// Alimenta um byte; retorna um pacote quando o frame fecha.
    pub fn push(&mut self, byte: u8) -> Option<Packet> {
        match self.step {
            DecodeStep::Kind => {
                if let Ok(kind) = PacketKind::try_from(byte) {
                    self.kind = kind;
                    self.step = DecodeStep::Length;
                }
                None
            }
            DecodeStep::Length => {
                let length = byte as usize;
                if length > self.max_payload {
                    self.step = DecodeStep::Kind;
                    None
                } else if length == 0 {
                    self.step = DecodeStep::Kind;
                    Some(Packet::new(self.kind, &[]))
                } else {
                    self.expected = length;
                    self.buffer.clear();
                    self.step = DecodeStep::Payload;
                    None
                }
            }
            DecodeStep::Payload => {
                self.buffer.push(byte);
                if self.buffer.len() >= self.expected {
                    self.step = DecodeStep::Kind;
                    Some(Packet::new(self.kind, &self.buffer))
                } else {
                    None
                }
            }
        }
    }

    /// Alimenta um bloco de bytes e retorna todos os frames completos.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Packet> {
        data.iter().filter_map(|&b| self.push(b)).collect()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_frame() {
        let pkt = encode_reset();
        assert_eq!(pkt.as_bytes(), &[0, 0]);
        assert_eq!(pkt.kind(), PacketKind::Reset);
        assert!(pkt.payload().is_empty());
        assert_eq!(pkt.len(), HEADER_SIZE);
    }

    #[test]
    fn cpu_bars_squared_scenario() {
        let pkt = encode_cpu_bars(&[10.0, 50.0, 90.0, 0.0]);
        assert_eq!(pkt.payload(), &[3, 64, 207, 0]);
        assert_eq!(pkt.as_bytes(), &[1, 4, 3, 64, 207, 0]);
    }

    #[test]
    fn net_bars_scenario() {
        let pkt = encode_net_bars(2048, 512, 1024);
        assert_eq!(pkt.as_bytes(), &[2, 2, 2, 0]);
    }

    #[test]
    fn cpu_level_matches_formula_and_is_monotonic() {
        let mut last = 0u8;
        for step in 0..=1000 {
            let x = step as f32 / 10.0;
            let level = cpu_level_squared(x);
            let ratio = x as f64 / 100.0;
            let expected = (ratio * ratio * 255.0).round().clamp(0.0, 255.0) as u8;
            assert_eq!(level, expected, "x = {x}");
            assert!(level >= last, "não monotônico em x = {x}");
            last = level;
        }
        assert_eq!(cpu_level_squared(100.0), 255);
    }

    #[test]
    fn cpu_levels_clamp_out_of_range_inputs() {
        assert_eq!(cpu_level_squared(-50.0), 0);
        assert_eq!(cpu_level_squared(250.0), 255);
        assert_eq!(cpu_level_squared(f32::NAN), 0);
        assert_eq!(cpu_level_linear(-1.0), 0);
        assert_eq!(cpu_level_linear(101.0), 255);
    }

    #[test]
    fn linear_and_squared_differ() {
        assert_eq!(cpu_level_linear(50.0), 128);
        assert_eq!(cpu_level_squared(50.0), 64);
    }

    #[test]
    fn net_level_saturates() {
        assert_eq!(net_level(0, 1024), 0);
        assert_eq!(net_level(1023, 1024), 0);
        assert_eq!(net_level(1024, 1024), 1);
        assert_eq!(net_level(u64::MAX, 1024), 255);
        assert_eq!(net_level(300, 0), 255);
        assert_eq!(net_level(5000, 4096), net_level(5000, 4096));
    }

    #[test]
    fn combined_layout() {
        let pkt = encode_combined(&[0.0, 50.0, 100.0, 25.0], 100, 300, 1, 0);
        assert_eq!(pkt.kind(), PacketKind::Combined);
        assert_eq!(pkt.as_bytes(), &[3, 8, 0, 128, 255, 64, 100, 255, 1, 0]);
    }

    #[test]
    fn oversized_core_list_is_truncated_to_length_byte() {
        let loads = vec![100.0; 300];
        let bars = encode_cpu_bars(&loads);
        assert_eq!(bars.payload().len(), MAX_PAYLOAD);
        assert_eq!(bars.as_bytes()[1] as usize, MAX_PAYLOAD);

        let combined = encode_combined(&loads, 1, 2, 3, 4);
        assert_eq!(combined.len(), HEADER_SIZE + MAX_PAYLOAD);
        assert_eq!(&combined.payload()[MAX_PAYLOAD - 4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn parse_validates_frames() {
        assert_eq!(Packet::parse(&[1]), Err(ProtocolError::TooShort(1)));
        assert_eq!(Packet::parse(&[9, 0]), Err(ProtocolError::UnknownKind(9)));
        assert_eq!(
            Packet::parse(&[2, 2, 7]),
            Err(ProtocolError::LengthMismatch { declared: 2, actual: 1 })
        );
        assert_eq!(Packet::parse(&[2, 2, 2, 0]), Ok(encode_net_bars(2048, 512, 1024)));
    }

    #[test]
    fn decoder_tracks_boundaries_by_length() {
        let frames = [
            encode_reset(),
            encode_cpu_bars(&[10.0, 50.0, 90.0, 0.0]),
            encode_net_bars(2048, 512, 1024),
        ];
        let stream: Vec<u8> = frames.iter().flat_map(|p| p.as_bytes().to_vec()).collect();

        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.feed(&stream), frames.to_vec());
    }

    #[test]
    fn decoder_resyncs_over_garbage_and_oversized_frames() {
        let mut decoder = FrameDecoder::new(DEVICE_MAX_PAYLOAD);
        let mut stream = vec![0xFF, 0x7F];
        // tamanho 40 > 32: descartado, volta a procurar um tipo
        stream.extend_from_slice(&[1, 40]);
        stream.extend_from_slice(encode_net_bars(4096, 0, 1024).as_bytes());

        let out = decoder.feed(&stream);
        assert_eq!(out, vec![encode_net_bars(4096, 0, 1024)]);
    }

    #[test]
    fn decoder_handles_split_chunks() {
        let pkt = encode_cpu_bars(&[20.0, 40.0]);
        let bytes = pkt.as_bytes();
        let mut decoder = FrameDecoder::default();
        assert!(decoder.feed(&bytes[..3]).is_empty());
        assert_eq!(decoder.feed(&bytes[3..]), vec![pkt.clone()]);
    }
}
