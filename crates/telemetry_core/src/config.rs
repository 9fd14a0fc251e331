//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável; flags de linha de comando
//! sobrescrevem os valores do arquivo.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Configuração da porta serial e da sessão.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Caminho do dispositivo (vazio = informado pela linha de comando)
    pub device: String,
    /// Baud rate (o firmware de referência usa 57600)
    pub baud_rate: u32,
    /// Timeout de escrita em segundos
    pub write_timeout_secs: f64,
    /// Primeira espera após falha de conexão (segundos)
    pub retry_initial_secs: f64,
    /// Teto do backoff exponencial (segundos)
    pub retry_max_secs: f64,
    /// Capacidade da fila de pacotes (descarta os mais antigos ao encher)
    pub queue_capacity: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: 57600,
            write_timeout_secs: 1.0,
            retry_initial_secs: 1.0,
            retry_max_secs: 30.0,
            queue_capacity: 4096,
        }
    }
}

impl SerialConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.write_timeout_secs)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_secs_f64(self.retry_initial_secs)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_secs_f64(self.retry_max_secs)
    }
}

/// Sampler rápido: barras de CPU (quadráticas) + barras de rede.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarSamplerConfig {
    pub enabled: bool,
    /// Período do tick em segundos
    pub interval_secs: f64,
    /// Janela de medição de CPU em segundos (bloqueante, dentro do tick)
    pub cpu_window_secs: f64,
    /// Divisor de bytes por nível de barra de rede
    pub net_scale: u64,
    /// Quantos cores enviar (0 = todos)
    pub max_cores: usize,
}

impl Default for BarSamplerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 0.25,
            cpu_window_secs: 0.2,
            net_scale: 1024,
            max_cores: 0,
        }
    }
}

/// Sampler lento: pacote combinado (CPU linear + quatro níveis de rede).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinedSamplerConfig {
    pub enabled: bool,
    pub interval_secs: f64,
    pub cpu_window_secs: f64,
    /// Divisor dos níveis "byte"
    pub byte_scale: u64,
    /// Divisor dos níveis "word"
    pub word_scale: u64,
    pub max_cores: usize,
}

impl Default for CombinedSamplerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 1.0,
            cpu_window_secs: 0.2,
            byte_scale: 1,
            word_scale: 4096,
            max_cores: 0,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub bars: BarSamplerConfig,
    pub combined: CombinedSamplerConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let serial = &self.serial;

        if serial.device.trim().is_empty() {
            errors.push("Dispositivo serial não informado".into());
        }
        if serial.baud_rate == 0 {
            errors.push("Baud rate não pode ser 0".into());
        }
        if !(0.01..=60.0).contains(&serial.write_timeout_secs) {
            errors.push(format!(
                "Timeout de escrita inválido: {} (0.01–60.0)",
                serial.write_timeout_secs
            ));
        }
        if !(0.01..=3600.0).contains(&serial.retry_initial_secs) {
            errors.push(format!(
                "Espera inicial de reconexão inválida: {} (0.01–3600.0)",
                serial.retry_initial_secs
            ));
        }
        if !(0.01..=3600.0).contains(&serial.retry_max_secs) {
            errors.push(format!(
                "Teto de reconexão inválido: {} (0.01–3600.0)",
                serial.retry_max_secs
            ));
        } else if serial.retry_max_secs < serial.retry_initial_secs {
            errors.push(format!(
                "Teto de reconexão ({}) menor que a espera inicial ({})",
                serial.retry_max_secs, serial.retry_initial_secs
            ));
        }
        if serial.queue_capacity == 0 {
            errors.push("Capacidade da fila não pode ser 0".into());
        }

        if !self.bars.enabled && !self.combined.enabled {
            errors.push("Nenhum sampler habilitado".into());
        }
        if self.bars.enabled {
            check_timing(&mut errors, "bars", self.bars.interval_secs, self.bars.cpu_window_secs);
            if self.bars.net_scale == 0 {
                errors.push("Escala de rede do sampler bars não pode ser 0".into());
            }
        }
        if self.combined.enabled {
            check_timing(
                &mut errors,
                "combined",
                self.combined.interval_secs,
                self.combined.cpu_window_secs,
            );
            if self.combined.byte_scale == 0 || self.combined.word_scale == 0 {
                errors.push("Escalas do sampler combined não podem ser 0".into());
            }
        }

        errors
    }
}

fn check_timing(errors: &mut Vec<String>, name: &str, interval: f64, window: f64) {
    if !(0.05..=60.0).contains(&interval) {
        errors.push(format!(
            "Intervalo do sampler {name} inválido: {interval} (0.05–60.0)"
        ));
    }
    if !(window > 0.0 && window <= interval) {
        errors.push(format!(
            "Janela de CPU do sampler {name} inválida: {window} (0 < janela ≤ intervalo)"
        ));
    }
}
