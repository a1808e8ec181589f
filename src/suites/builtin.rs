//! Bundled suites
//!
//! These drive the engine end to end against an in-memory echo transport:
//! nested parameters, fixtures with custom connection factories, failure
//! handling, forked copies and repetition.

use anyhow::Context;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Suite, SuiteRegistry};
use crate::framework::{
    AggregatedInvoker, CapturedInvoker, CustomInstanceFactory, EngineError, Fixture,
    ForkedInvoker, LeafInvoker, ListSource, ParameterValue, RepeatedInvoker, ReusePolicy,
    TestContext, TestHost, TestInvoker, TestOutcome,
};
use crate::models::TestFlags;

pub const ENCODINGS_SOURCE: &str = "encodings";
pub const PROTOCOLS_SOURCE: &str = "protocols";
pub const CONNECTION_FACTORY: &str = "connection";

const CHUNK_SIZE: usize = 8;

pub fn register_builtins(suites: &mut SuiteRegistry) {
    suites
        .registry_mut()
        .register_source(
            ENCODINGS_SOURCE,
            ListSource::new(["identity", "chunked", "gzip"]),
        )
        .register_source(PROTOCOLS_SOURCE, ListSource::new(["tls12", "tls13"]))
        .register_factory(CONNECTION_FACTORY, Arc::new(ConnectionFactory::default()));

    suites
        .register(Suite::new(
            "parameters",
            "Transfer encodings and protocol versions under nested parameters",
            || Arc::new(parameters()) as Arc<dyn TestInvoker>,
        ))
        .register(Suite::new(
            "fixtures",
            "Echo server fixture with custom connection instances",
            || Arc::new(fixtures()) as Arc<dyn TestInvoker>,
        ))
        .register(Suite::new(
            "failures",
            "Failing, faulting and ignored tests plus a broken teardown",
            || Arc::new(failures()) as Arc<dyn TestInvoker>,
        ))
        .register(Suite::new(
            "forked",
            "Independent client copies running concurrently",
            || Arc::new(forked()) as Arc<dyn TestInvoker>,
        ))
        .register(Suite::new(
            "repeat",
            "Repeated toggling under a boolean parameter",
            || Arc::new(repeat()) as Arc<dyn TestInvoker>,
        ))
        .register(
            Suite::new("stall", "A test that waits until it is canceled", || {
                Arc::new(LeafInvoker::from_fn("Stall", stall)) as Arc<dyn TestInvoker>
            })
            .with_flags(TestFlags::HIDDEN),
        );
}

fn parameters() -> AggregatedInvoker {
    let transfer = AggregatedInvoker::new("Transfer")
        .with_host(TestHost::registered_parameter(
            "encoding",
            "encoding",
            ENCODINGS_SOURCE,
        ))
        .child(LeafInvoker::from_fn("RoundTrip", round_trip));

    let handshake = AggregatedInvoker::new("Handshake")
        .with_host(
            TestHost::registered_parameter("protocol", "protocol", PROTOCOLS_SOURCE)
                .with_reuse(ReusePolicy::PerChild),
        )
        .with_category("tls")
        .child(LeafInvoker::from_fn("Negotiate", negotiate))
        .child(LeafInvoker::from_fn("Resume", negotiate));

    AggregatedInvoker::new("Parameters")
        .with_flags(TestFlags::BROWSABLE | TestFlags::CONTINUE_ON_ERROR)
        .with_host(TestHost::boolean("keep_alive"))
        .child(transfer)
        .child(handshake)
}

fn fixtures() -> AggregatedInvoker {
    let connection = AggregatedInvoker::new("Connection")
        .with_host(TestHost::custom_from_fixture("connection"))
        .child(LeafInvoker::from_fn("Echo", echo))
        .child(CapturedInvoker::new(
            "Replay",
            Arc::new(LeafInvoker::from_fn("Echo", echo)),
        ));

    let pooled = AggregatedInvoker::new("Pooled")
        .with_host(TestHost::custom_registered("connection", CONNECTION_FACTORY))
        .child(LeafInvoker::from_fn("Echo", echo));

    AggregatedInvoker::new("Fixtures")
        .with_host(TestHost::fixture("server", |ctx| {
            let server = EchoServer::bind();
            ctx.log(format!("echo server listening on port {}", server.port));
            Ok(Fixture::new(server).with_factory(Arc::new(ConnectionFactory::default())))
        }))
        .child(connection)
        .child(pooled)
}

fn failures() -> AggregatedInvoker {
    let stops_early = AggregatedInvoker::new("StopsEarly")
        .child(LeafInvoker::from_fn("BadStatus", |_, _| async {
            Ok(TestOutcome::Failed("expected status 200, got 502".into()))
        }))
        .child(LeafInvoker::from_fn("NeverRuns", |_, _| async {
            Ok(TestOutcome::Passed)
        }));

    let leaky = AggregatedInvoker::new("LeakyTeardown")
        .with_host(TestHost::custom("listener", Arc::new(LeakyListener)))
        .child(LeafInvoker::from_fn("Accept", |_, _| async {
            Ok(TestOutcome::Passed)
        }));

    AggregatedInvoker::new("Failures")
        .with_flags(TestFlags::BROWSABLE | TestFlags::CONTINUE_ON_ERROR)
        .child(LeafInvoker::from_fn("Passes", |_, _| async {
            Ok(TestOutcome::Passed)
        }))
        .child(LeafInvoker::from_fn("Faults", |_, _| async {
            Err(anyhow::anyhow!("connection reset by peer"))
        }))
        .child(LeafInvoker::from_fn("Unsupported", |_, _| async {
            Ok(TestOutcome::Ignored("renegotiation is not supported".into()))
        }))
        .child(stops_early)
        .child(leaky)
}

fn forked() -> ForkedInvoker {
    ForkedInvoker::new("Forked", 4, || {
        Arc::new(
            AggregatedInvoker::new("Client")
                .with_category("stress")
                .with_host(TestHost::fixture("server", |_| {
                    Ok(Fixture::new(EchoServer::bind()))
                }))
                .child(LeafInvoker::from_fn("Echo", echo)),
        ) as Arc<dyn TestInvoker>
    })
    .with_random_delay(20)
}

fn repeat() -> RepeatedInvoker {
    let toggle = AggregatedInvoker::new("Toggle")
        .with_host(TestHost::boolean("flag"))
        .child(LeafInvoker::from_fn("Flip", |ctx, _| async move {
            let flag = ctx
                .parameter_as::<bool>("flag")
                .context("flag is not bound")?;
            ctx.log(format!("{flag} -> {}", !flag));
            Ok(TestOutcome::Passed)
        }));

    RepeatedInvoker::new("Repeat", 3, Arc::new(toggle))
}

/// Sleep for `ms`, returning early with a cancellation error
async fn pause(cancel: &CancellationToken, ms: u64) -> anyhow::Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
        _ = cancel.cancelled() => Err(EngineError::Canceled.into()),
    }
}

async fn round_trip(ctx: TestContext, cancel: CancellationToken) -> anyhow::Result<TestOutcome> {
    let encoding = ctx
        .parameter_as::<&'static str>("encoding")
        .context("encoding is not bound")?;
    let keep_alive = ctx.parameter_as::<bool>("keep_alive").unwrap_or(false);

    let payload = "The quick brown fox jumps over the lazy dog";
    let Some(wire) = encode(payload, encoding) else {
        return Ok(TestOutcome::Ignored(format!(
            "{encoding} is not implemented by the echo transport"
        )));
    };

    pause(&cancel, 2).await?;
    ctx.log(format!(
        "sent {} bytes ({encoding}, keep_alive={keep_alive})",
        wire.len()
    ));

    let received = decode(&wire, encoding)?;
    if received != payload {
        return Ok(TestOutcome::Failed(format!(
            "payload mismatch: {received:?}"
        )));
    }
    Ok(TestOutcome::Passed)
}

async fn negotiate(ctx: TestContext, cancel: CancellationToken) -> anyhow::Result<TestOutcome> {
    let protocol = ctx
        .parameter_as::<&'static str>("protocol")
        .context("protocol is not bound")?;
    pause(&cancel, 1).await?;
    ctx.debug(2, format_args!("negotiated {protocol}"));
    Ok(TestOutcome::Passed)
}

async fn echo(ctx: TestContext, cancel: CancellationToken) -> anyhow::Result<TestOutcome> {
    let server = ctx.fixture::<EchoServer>().context("no echo server")?;
    let connection = ctx
        .parameter("connection")
        .and_then(|v| v.downcast_arc::<Connection>());

    pause(&cancel, 1).await?;
    let reply = server.echo("ping");
    anyhow::ensure!(reply == "ping", "unexpected reply {reply:?}");

    match connection {
        Some(connection) => {
            anyhow::ensure!(
                connection.port == server.port,
                "connection {} targets port {}, server is on {}",
                connection.id,
                connection.port,
                server.port
            );
            ctx.log(format!("echo over connection {}", connection.id));
        }
        None => ctx.log(format!("echo on port {}", server.port)),
    }
    Ok(TestOutcome::Passed)
}

async fn stall(ctx: TestContext, cancel: CancellationToken) -> anyhow::Result<TestOutcome> {
    ctx.log("waiting for cancellation");
    pause(&cancel, 3_600_000).await?;
    Ok(TestOutcome::Passed)
}

fn encode(payload: &str, encoding: &str) -> Option<Vec<u8>> {
    match encoding {
        "identity" => Some(payload.as_bytes().to_vec()),
        "chunked" => {
            let mut wire = Vec::new();
            for chunk in payload.as_bytes().chunks(CHUNK_SIZE) {
                wire.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                wire.extend_from_slice(chunk);
                wire.extend_from_slice(b"\r\n");
            }
            wire.extend_from_slice(b"0\r\n\r\n");
            Some(wire)
        }
        _ => None,
    }
}

fn decode(wire: &[u8], encoding: &str) -> anyhow::Result<String> {
    let text = std::str::from_utf8(wire).context("payload is not utf-8")?;
    if encoding != "chunked" {
        return Ok(text.to_string());
    }

    let mut decoded = String::new();
    let mut rest = text;
    loop {
        let (size, tail) = rest.split_once("\r\n").context("missing chunk header")?;
        let size = usize::from_str_radix(size, 16).context("invalid chunk size")?;
        if size == 0 {
            return Ok(decoded);
        }
        anyhow::ensure!(tail.len() >= size + 2, "truncated chunk");
        decoded.push_str(&tail[..size]);
        rest = &tail[size + 2..];
    }
}

/// In-memory echo endpoint used as a fixture
#[derive(Debug)]
pub struct EchoServer {
    pub port: u16,
}

impl EchoServer {
    fn bind() -> Self {
        Self {
            port: rand::random_range(40_000..50_000),
        }
    }

    pub fn echo(&self, payload: &str) -> String {
        payload.to_string()
    }
}

/// Client connection bound by a custom host
#[derive(Debug)]
pub struct Connection {
    pub id: usize,
    pub port: u16,
}

/// Opens connections against the nearest echo server fixture
#[derive(Default)]
struct ConnectionFactory {
    opened: AtomicUsize,
}

#[async_trait]
impl CustomInstanceFactory for ConnectionFactory {
    async fn initialize(
        &self,
        ctx: &TestContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ParameterValue> {
        let server = ctx
            .fixture::<EchoServer>()
            .context("connections need an echo server fixture")?;
        pause(cancel, 1).await?;

        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ParameterValue::with_identifier(
            format!("conn-{id}"),
            Connection {
                id,
                port: server.port,
            },
        ))
    }

    async fn destroy(
        &self,
        ctx: &TestContext,
        value: &ParameterValue,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        ctx.debug(2, format_args!("closing {value}"));
        Ok(())
    }
}

/// Listener whose teardown always fails
struct LeakyListener;

#[async_trait]
impl CustomInstanceFactory for LeakyListener {
    async fn initialize(
        &self,
        _ctx: &TestContext,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<ParameterValue> {
        Ok(ParameterValue::new("0.0.0.0:8443"))
    }

    async fn destroy(
        &self,
        _ctx: &TestContext,
        value: &ParameterValue,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        anyhow::bail!("{value} is still accepting connections")
    }
}
