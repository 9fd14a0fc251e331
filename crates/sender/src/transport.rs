//! Transporte serial: abertura exclusiva do dispositivo.
//!
//! A sessão só enxerga o trait [`Connector`]; em produção ele abre a porta
//! via `serialport`, nos testes um mock roteirizado faz o papel do display.

use std::io::{self, Write};
use std::time::Duration;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::debug;

/// Falhas de transporte. Nunca são fatais: a sessão reconecta.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Falha ao abrir {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("Falha de escrita em {device}: {source}")]
    Write {
        device: String,
        #[source]
        source: io::Error,
    },
}

/// Abre uma conexão exclusiva com o dispositivo.
///
/// Soltar o `Link` fecha o dispositivo.
pub trait Connector {
    type Link: Write;

    /// Identificação do alvo para logs (caminho do dispositivo).
    fn target(&self) -> &str;

    fn connect(&mut self) -> io::Result<Self::Link>;
}

/// Porta serial 8N1 sem controle de fluxo.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
    write_timeout: Duration,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32, write_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            write_timeout,
        }
    }
}

impl Connector for SerialConnector {
    type Link = Box<dyn SerialPort>;

    fn target(&self) -> &str {
        &self.path
    }

    fn connect(&mut self) -> io::Result<Self::Link> {
        // Em Unix o serialport abre com TIOCEXCL: uma sessão por dispositivo.
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.write_timeout)
            .open()?;
        debug!("Porta {} aberta a {} baud", self.path, self.baud_rate);
        Ok(port)
    }
}
