use crate::cli::args::{Args, Command, ConfigArgs, ConfigCommand, DataFormat, OpenArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::core::catalog::PortCatalog;
use crate::core::session::{SerialSession, SessionState};
use crate::core::sink::{ChannelSink, FanoutSink, LogEntry, RecordLog, SessionEvent};
use crate::domain::config::{DeviceId, PortConfig, SercomConfig};
use crate::domain::error::{SercomError, SercomResult, SessionError};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::{system_session, SystemCatalog};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

/// Execute CLI command
pub async fn execute_command(args: Args) -> SercomResult<()> {
    let writer = ConsoleWriter::new(args.output);

    let config_manager = match &args.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };

    // A broken file must not stop `config validate` from reporting it.
    let config = match &args.command {
        Command::Config(ConfigArgs {
            command: ConfigCommand::Validate { .. } | ConfigCommand::Init { .. },
        })
        | Command::Version => config_manager.load_config().unwrap_or_default(),
        _ => config_manager.load_config()?,
    };

    if !args.quiet {
        let level = if args.verbose {
            "debug"
        } else {
            config.global.log_level.as_str()
        };
        init_logging(level, args.verbose)?;
    }

    match args.command {
        Command::Ports => execute_ports_command(&writer),
        Command::Open(open_args) => execute_open_command(open_args, &writer, &config).await,
        Command::Config(config_args) => {
            execute_config_command(config_args.command, &writer, &config, &config_manager)
        }
        Command::Version => {
            writer.write_message(&format!("sercom {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

fn execute_ports_command(writer: &ConsoleWriter) -> SercomResult<()> {
    let ports = SystemCatalog::new().list_port_details();
    writer.write_ports(&ports)?;
    Ok(())
}

async fn execute_open_command(
    args: OpenArgs,
    writer: &ConsoleWriter,
    config: &SercomConfig,
) -> SercomResult<()> {
    let port_config = resolve_port_config(&args, &config.port)?;
    let mut options = config.session.clone();
    if let Some(line_ending) = args.line_ending {
        options = options.with_line_ending(line_ending.into());
    }

    let (channel, events) = ChannelSink::new();
    let history = RecordLog::new(config.global.history_limit);
    let sink = FanoutSink::new()
        .with(Arc::new(channel))
        .with(Arc::new(history.clone()));

    let session = system_session(Arc::new(sink), options);
    session.open(DeviceId::from(args.port), port_config).await?;
    writer.write_message(&format!(
        "Connected at {} (Ctrl+C to quit, input as {})",
        port_config, args.format
    ))?;

    let stdin = BufReader::new(tokio::io::stdin());
    let outcome = run_session(&session, events, stdin, args.format, writer).await;

    let (received, sent) = history
        .entries()
        .iter()
        .fold((0usize, 0usize), |(rx, tx), entry| match entry {
            LogEntry::Received(_) => (rx + 1, tx),
            LogEntry::Sent(_) => (rx, tx + 1),
        });
    debug!("Session ended: {} records received, {} sent", received, sent);

    outcome
}

/// Forward input lines to the session and print its events until input ends,
/// Ctrl+C is pressed or the session faults. The session is closed on return.
pub async fn run_session<R>(
    session: &SerialSession,
    mut events: UnboundedReceiver<SessionEvent>,
    input: R,
    format: DataFormat,
    writer: &ConsoleWriter,
) -> SercomResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = send_input(session, &line, format).await {
                        writer.write_error(&e.to_string())?;
                        if matches!(e, SercomError::Session(SessionError::NotOpen)) {
                            break;
                        }
                    }
                }
                None => {
                    debug!("Input closed");
                    break;
                }
            },
            event = events.recv() => match event {
                Some(event) => {
                    if !print_event(writer, &event)? {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.close().await;
    while let Ok(event) = events.try_recv() {
        print_event(writer, &event)?;
    }
    Ok(())
}

async fn send_input(session: &SerialSession, line: &str, format: DataFormat) -> SercomResult<()> {
    match format {
        DataFormat::Text => session.send_line(line).await?,
        _ => session.write(&parse_data(line, format)?).await?,
    };
    Ok(())
}

/// Print one session event; returns false once the session has faulted
fn print_event(writer: &ConsoleWriter, event: &SessionEvent) -> SercomResult<bool> {
    match event {
        SessionEvent::Received(record) => writer.write_record(record)?,
        SessionEvent::Sent(record) => writer.write_sent(record)?,
        SessionEvent::StateChanged { state, reason } => {
            writer.write_state(*state, reason.as_deref())?;
            if *state == SessionState::Faulted {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn execute_config_command(
    command: ConfigCommand,
    writer: &ConsoleWriter,
    config: &SercomConfig,
    config_manager: &ConfigManager,
) -> SercomResult<()> {
    match command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
            Ok(())
        }
        ConfigCommand::Init { path, force } => {
            let path = path.unwrap_or_else(|| config_manager.config_path().to_path_buf());
            config_manager.init_config(&path, force)?;
            writer.write_message(&format!("Configuration written to {}", path.display()))?;
            Ok(())
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(|| config_manager.config_path().to_path_buf());
            config_manager.load_config_from_path(&path)?;
            writer.write_message(&format!("Configuration file is valid: {}", path.display()))?;
            Ok(())
        }
    }
}

/// Command line overrides applied on top of the configured defaults
fn resolve_port_config(args: &OpenArgs, defaults: &PortConfig) -> SercomResult<PortConfig> {
    let config = PortConfig::new(
        args.baud.unwrap_or(defaults.baud_rate()),
        args.data_bits.unwrap_or(defaults.data_bits()),
        args.stop_bits.unwrap_or(defaults.stop_bits()),
        args.parity.map(Into::into).unwrap_or(defaults.parity()),
        args.flow_control
            .map(Into::into)
            .unwrap_or(defaults.flow_control()),
    )?;
    Ok(config)
}

fn parse_data(data: &str, format: DataFormat) -> SercomResult<Vec<u8>> {
    match format {
        DataFormat::Text => Ok(data.as_bytes().to_vec()),
        DataFormat::Hex => {
            let cleaned: String = data.split_whitespace().collect();
            hex::decode(&cleaned)
                .map_err(|e| SercomError::InvalidInput(format!("Invalid hex data: {}", e)))
        }
        DataFormat::Base64 => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| SercomError::InvalidInput(format!("Invalid base64 data: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{FlowControlArg, OutputFormat, ParityArg};
    use crate::domain::config::{FlowControl, Parity, SessionOptions};
    use crate::infrastructure::serial::MockTransport;
    use std::time::Duration;

    fn open_args(port: &str) -> OpenArgs {
        OpenArgs {
            port: port.to_string(),
            baud: None,
            data_bits: None,
            stop_bits: None,
            parity: None,
            flow_control: None,
            line_ending: None,
            format: DataFormat::Text,
        }
    }

    #[test]
    fn test_parse_data_formats() {
        assert_eq!(parse_data("hello", DataFormat::Text).unwrap(), b"hello");
        assert_eq!(parse_data("48 65 6c", DataFormat::Hex).unwrap(), b"Hel");
        assert_eq!(parse_data("SGk=", DataFormat::Base64).unwrap(), b"Hi");
        assert!(matches!(
            parse_data("zz", DataFormat::Hex),
            Err(SercomError::InvalidInput(_))
        ));
        assert!(parse_data("!!", DataFormat::Base64).is_err());
    }

    #[test]
    fn test_resolve_port_config_overrides() {
        let mut args = open_args("COM1");
        args.baud = Some(115200);
        args.parity = Some(ParityArg::Odd);
        args.flow_control = Some(FlowControlArg::XonXoff);

        let config = resolve_port_config(&args, &PortConfig::default()).unwrap();
        assert_eq!(config.baud_rate(), 115200);
        assert_eq!(config.data_bits(), 8);
        assert_eq!(config.parity(), Parity::Odd);
        assert_eq!(config.flow_control(), FlowControl::XonXoff);

        args.data_bits = Some(9);
        assert!(matches!(
            resolve_port_config(&args, &PortConfig::default()),
            Err(SercomError::PortOption(_))
        ));
    }

    #[tokio::test]
    async fn test_run_session_forwards_input_until_eof() {
        let transport = Arc::new(MockTransport::new());
        let device = transport.add_device("COM-TEST");
        let (channel, events) = ChannelSink::new();
        let options = SessionOptions {
            read_poll_ms: 5,
            ..SessionOptions::default()
        };
        let session = SerialSession::new(transport, Arc::new(channel), options);
        session
            .open(DeviceId::from("COM-TEST"), PortConfig::default())
            .await
            .unwrap();

        let writer = ConsoleWriter::new(OutputFormat::Text);
        let input: &[u8] = b"PING\n";
        tokio::time::timeout(
            Duration::from_secs(5),
            run_session(&session, events, input, DataFormat::Text, &writer),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(device.written(), b"PING\n");
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!device.is_open());
    }

    #[tokio::test]
    async fn test_run_session_stops_on_fault() {
        let transport = Arc::new(MockTransport::new());
        let device = transport.add_device("COM-TEST");
        let (channel, events) = ChannelSink::new();
        let options = SessionOptions {
            read_poll_ms: 5,
            ..SessionOptions::default()
        };
        let session = SerialSession::new(transport, Arc::new(channel), options);
        session
            .open(DeviceId::from("COM-TEST"), PortConfig::default())
            .await
            .unwrap();
        device.end_stream();

        // Input that never ends; only the fault can stop the loop.
        let (_keep_open, reader) = tokio::io::duplex(64);
        let writer = ConsoleWriter::new(OutputFormat::Text);
        tokio::time::timeout(
            Duration::from_secs(5),
            run_session(&session, events, BufReader::new(reader), DataFormat::Hex, &writer),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!device.is_open());
    }
}
