//! ebusd gateway backend
//!
//! ebusd exposes the eBUS of the heating system through a line based TCP
//! interface. Every request is one command line; the answer is one or more
//! lines terminated by an empty line. Errors start with `ERR:`.
//!
//! Reads go through ebusd's own cache (`read -m <maxage>`); writes need the
//! circuit name of the system controller, which is discovered once with
//! `find HwcSFMode`.

use crate::command::{BackendCapabilities, CommandChannel};
use crate::error::{HestiaError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::model::{DeviceSnapshot, HotwaterState, OperationMode, ZoneState};
use crate::telemetry::SnapshotFetcher;
use chrono::{Duration, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Attempts per read when ebusd answers with an error
const READ_ATTEMPTS: usize = 3;

/// Special function value while a hot water boost runs
const HWC_BOOST: &str = "load";
/// Special function value while a quick veto runs, written and read back alike
const ZONE_VETO: &str = "veto";
/// Special function value for normal operation
const SF_AUTO: &str = "auto";

/// Extract the payload of an ebusd answer line
pub fn parse_reply(line: &str) -> Result<&str> {
    let line = line.trim();
    if let Some(err) = line.strip_prefix("ERR:") {
        return Err(HestiaError::upstream(format!("ebusd: {}", err.trim())));
    }
    Ok(line)
}

/// Parse a numeric value; ebusd may append further fields after `;`
pub fn parse_number(name: &str, value: &str) -> Result<f64> {
    let field = value.split(';').next().unwrap_or_default().trim();
    field.parse::<f64>().map_err(|_| {
        HestiaError::upstream(format!("ebusd: {} is not a number: '{}'", name, value))
    })
}

/// Circuit name from a `find` answer such as `ctlv2 HwcSFMode = auto`
pub fn parse_circuit(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("ERR:") {
        return None;
    }
    line.split_whitespace().next().map(str::to_string)
}

/// One open connection to ebusd
struct Connection {
    stream: BufReader<TcpStream>,
}

impl Connection {
    /// Send one command and collect the answer lines
    async fn request(&mut self, command: &str) -> Result<Vec<String>> {
        self.stream
            .get_mut()
            .write_all(format!("{}\n", command).as_bytes())
            .await?;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.stream.read_line(&mut line).await?;
            if n == 0 {
                if lines.is_empty() {
                    return Err(HestiaError::upstream("ebusd closed the connection"));
                }
                break;
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            lines.push(line.to_string());
        }
        Ok(lines)
    }

    async fn first_line(&mut self, command: &str) -> Result<String> {
        self.request(command)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HestiaError::upstream(format!("ebusd: empty answer to '{}'", command)))
    }
}

/// Client for the ebusd TCP interface
pub struct EbusdClient {
    address: String,
    zone: u32,
    max_age: u32,
    timeout: std::time::Duration,
    circuit: Mutex<Option<String>>,
    logger: StructuredLogger,
}

impl EbusdClient {
    pub fn new(address: &str, zone: u32, max_age: u32, timeout: std::time::Duration) -> Self {
        Self {
            address: address.to_string(),
            zone,
            max_age,
            timeout,
            circuit: Mutex::new(None),
            logger: get_logger_with_context(
                LogContext::new("ebusd").with_field("address", address.to_string()),
            ),
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                HestiaError::upstream(format!("ebusd: connect to {} timed out", self.address))
            })?
            .map_err(|e| {
                HestiaError::upstream(format!("ebusd: connect to {} failed: {}", self.address, e))
            })?;
        Ok(Connection {
            stream: BufReader::new(stream),
        })
    }

    async fn read(&self, conn: &mut Connection, name: &str) -> Result<String> {
        let command = format!("read -m {} {}", self.max_age, name);
        let mut last_err = None;
        for attempt in 1..=READ_ATTEMPTS {
            let line = conn.first_line(&command).await?;
            match parse_reply(&line) {
                Ok(value) => return Ok(value.to_string()),
                Err(e) => {
                    self.logger.debug(&format!(
                        "Read of {} failed (attempt {}/{}): {}",
                        name, attempt, READ_ATTEMPTS, e
                    ));
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| HestiaError::upstream(format!("ebusd: no value for {}", name))))
    }

    async fn read_number(&self, conn: &mut Connection, name: &str) -> Result<f64> {
        let value = self.read(conn, name).await?;
        parse_number(name, &value)
    }

    async fn controller(&self, conn: &mut Connection) -> Result<String> {
        let mut circuit = self.circuit.lock().await;
        if let Some(c) = circuit.as_ref() {
            return Ok(c.clone());
        }
        let line = conn.first_line("find HwcSFMode").await?;
        let found = parse_circuit(&line).ok_or_else(|| {
            HestiaError::command_failed(format!("ebusd: no controller circuit found ('{}')", line))
        })?;
        self.logger
            .info(&format!("Using controller circuit '{}'", found));
        *circuit = Some(found.clone());
        Ok(found)
    }

    /// Write `value` to `name` on the controller circuit
    async fn write(&self, name: &str, value: &str) -> Result<()> {
        let run = async {
            let mut conn = self
                .connect()
                .await
                .map_err(|e| HestiaError::command_failed(e.to_string()))?;
            let circuit = self.controller(&mut conn).await?;
            let line = conn
                .first_line(&format!("write -c {} {} {}", circuit, name, value))
                .await
                .map_err(|e| HestiaError::command_failed(e.to_string()))?;
            if line.trim() != "done" {
                return Err(HestiaError::command_failed(format!(
                    "ebusd: write {}={} answered '{}'",
                    name,
                    value,
                    line.trim()
                )));
            }
            Ok(())
        };
        tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| HestiaError::command_failed(format!("ebusd: write {} timed out", name)))??;
        self.logger.info(&format!("Wrote {}={}", name, value));
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotFetcher for EbusdClient {
    fn name(&self) -> &'static str {
        "ebusd"
    }

    async fn fetch(&self) -> Result<DeviceSnapshot> {
        let mut conn = self.connect().await?;

        let hotwater = HotwaterState {
            operation_mode: OperationMode::from_vendor(&self.read(&mut conn, "HwcOpMode").await?),
            temperature_setpoint: self.read_number(&mut conn, "HwcTempDesired").await?,
            live_temperature: self.read_number(&mut conn, "HwcStorageTemp").await?,
            observed_quickmode: self.read(&mut conn, "HwcSFMode").await?,
        };

        let z = self.zone;
        let zone = ZoneState {
            index: z,
            operation_mode: OperationMode::from_vendor(
                &self.read(&mut conn, &format!("z{}OpMode", z)).await?,
            ),
            desired_setpoint: self
                .read_number(&mut conn, &format!("z{}ActualRoomTempDesired", z))
                .await?,
            observed_quickmode: self.read(&mut conn, &format!("z{}SFMode", z)).await?,
            inside_temperature: self
                .read_number(&mut conn, &format!("z{}RoomTemp", z))
                .await?,
        };

        Ok(DeviceSnapshot {
            hotwater,
            zones: vec![zone],
            captured_at: Utc::now(),
        })
    }
}

#[async_trait::async_trait]
impl CommandChannel for EbusdClient {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            idle_placeholder: true,
            tolerates_overlapping_stop_failure: false,
            restart_cooldown_seconds: 120,
        }
    }

    async fn start_hotwater_boost(&self) -> Result<()> {
        self.write("HwcSFMode", HWC_BOOST).await
    }

    async fn stop_hotwater_boost(&self) -> Result<()> {
        self.write("HwcSFMode", SF_AUTO).await
    }

    async fn start_zone_veto(&self, zone: u32, setpoint: f64, _duration: Duration) -> Result<()> {
        // The controller ends a quick veto by itself; ebusd has no duration field
        self.write(&format!("z{}QuickVetoTemp", zone), &format!("{:.1}", setpoint))
            .await?;
        self.write(&format!("z{}SFMode", zone), ZONE_VETO).await
    }

    async fn stop_zone_veto(&self, zone: u32) -> Result<()> {
        self.write(&format!("z{}SFMode", zone), SF_AUTO).await
    }
}
