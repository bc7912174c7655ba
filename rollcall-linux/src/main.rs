// Rollcall: host or join a local attendance session over UDP broadcast.

use anyhow::{bail, Context};
use rollcall_core::{ClaimStatus, DiscoveredSession, SessionConfig, SessionId, StudentId};
use rollcall_linux::{config, logging, App, Mode, UdpNetwork};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage:
  rollcall host [--duration SECS] [--label TEXT]   run a session, print the roster on end
  rollcall join [--student-id ID] [--session ID]   confirm presence in a nearby session
  rollcall --version";

#[derive(Debug, Default, PartialEq)]
struct RunArgs {
    duration_secs: u32,
    label: Option<String>,
    student_id: Option<String>,
    session: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Cli {
    Version,
    Help,
    Run(Mode, RunArgs),
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Cli> {
    let mut args = args.into_iter();
    let mut mode = None;
    let mut run = RunArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Cli::Version),
            "--help" | "-h" => return Ok(Cli::Help),
            "--duration" => {
                let v = args.next().context("--duration needs a value")?;
                run.duration_secs = v.parse().with_context(|| format!("bad duration {v:?}"))?;
            }
            "--label" => run.label = Some(args.next().context("--label needs a value")?),
            "--student-id" => {
                run.student_id = Some(args.next().context("--student-id needs a value")?)
            }
            "--session" => run.session = Some(args.next().context("--session needs a value")?),
            other if mode.is_none() && !other.starts_with('-') => {
                mode = Some(other.parse::<Mode>()?)
            }
            other => bail!("unexpected argument {other:?}\n{USAGE}"),
        }
    }
    match mode {
        Some(m) => Ok(Cli::Run(m, run)),
        None => Ok(Cli::Help),
    }
}

fn main() -> anyhow::Result<()> {
    let (mode, args) = match parse_args(std::env::args().skip(1))? {
        Cli::Version => {
            println!("rollcall {}", VERSION);
            return Ok(());
        }
        Cli::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        Cli::Run(mode, args) => (mode, args),
    };

    logging::init();
    let cfg = config::load();
    let mut app = App::new(UdpNetwork::default(), cfg.protocol());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match mode {
            Mode::Lecturer => host(&mut app, args).await,
            Mode::Student => {
                let student_id = args
                    .student_id
                    .clone()
                    .or(cfg.student_id.clone())
                    .map(StudentId::from)
                    .filter(|id| !id.is_empty())
                    .context("no student id: pass --student-id or set ROLLCALL_STUDENT_ID")?;
                join(&mut app, student_id, args.session.map(SessionId::from)).await
            }
        }
    })
}

async fn host(app: &mut App<UdpNetwork>, args: RunArgs) -> anyhow::Result<()> {
    let mut config = SessionConfig::with_duration_secs(args.duration_secs)?;
    if let Some(label) = args.label {
        config = config.label(label);
    }
    let session = app.host(config).await?;
    let status = session.status();
    info!(
        session_id = %status.session_id,
        port = status.listen_port,
        remaining_secs = ?status.remaining_secs,
        "session open"
    );

    tokio::select! {
        _ = session.ended() => info!("session time is up"),
        r = shutdown_signal() => r?,
    }

    let roster = app.deactivate().await?.unwrap_or_default();
    info!(present = roster.len(), "session closed");
    println!("{}", serde_json::to_string_pretty(&roster)?);
    Ok(())
}

async fn join(
    app: &mut App<UdpNetwork>,
    student_id: StudentId,
    wanted: Option<SessionId>,
) -> anyhow::Result<()> {
    let agent = app.join().await?;
    info!(%student_id, "listening for sessions");

    let matches_wanted =
        |s: &DiscoveredSession| wanted.as_ref().map_or(true, |w| &s.session_id == w);
    let found = tokio::select! {
        s = agent.wait_for_session(matches_wanted) => Some(s?),
        r = shutdown_signal() => { r?; None }
    };
    let Some(session) = found else {
        app.deactivate().await?;
        return Ok(());
    };
    info!(
        session_id = %session.session_id,
        origin = %session.origin_address,
        label = session.label.as_deref().unwrap_or(""),
        "session found"
    );

    agent.confirm_presence(&student_id, &session.session_id).await?;
    let outcome = tokio::select! {
        c = agent.wait_for_claim(is_settled) => Some(c?),
        r = shutdown_signal() => { r?; None }
    };
    app.deactivate().await?;

    let Some(outcome) = outcome else {
        return Ok(());
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !matches!(outcome, ClaimStatus::Confirmed { .. }) {
        bail!("presence not confirmed");
    }
    Ok(())
}

/// Claim has an outcome: confirmed, failed or timed out.
fn is_settled(claim: &ClaimStatus) -> bool {
    !matches!(claim, ClaimStatus::Idle | ClaimStatus::Pending { .. })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
