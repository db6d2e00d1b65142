use anyhow::anyhow;
use callwire::bind::BoundArgs;
use callwire::descriptor::{OperationDescriptor, ParamSpec};
use callwire::registry::{Handler, HandlerClass, HandlerFactory, HandlerRegistry};
use callwire::server::{DispatchServer, ServerConfig};
use futures::FutureExt;
use serde_json::json;
use std::sync::{Arc, Weak};

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Smoke-test handler: echoes and does arithmetic.
struct EchoHandler;

impl Handler for EchoHandler {}

impl HandlerFactory for EchoHandler {
    fn operations() -> Vec<OperationDescriptor> {
        vec![
            OperationDescriptor::new("echo", "Echoes the supplied message.")
                .param(ParamSpec::string("message", "Message to echo.").with_default("hi"))
                .returns("The message.")
                .handle(|_: &EchoHandler, args: BoundArgs| {
                    futures::future::ready(Ok(args.value(0))).boxed()
                }),
            OperationDescriptor::new("add", "Adds two integers.")
                .param(ParamSpec::long("a", "First addend."))
                .param(ParamSpec::long("b", "Second addend."))
                .returns("The sum.")
                .handle(|_: &EchoHandler, args: BoundArgs| {
                    async move { Ok(json!(args.long(0)? + args.long(1)?)) }.boxed()
                }),
        ]
    }

    fn construct(_registry: &Arc<HandlerRegistry>) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// Exposes the registry's own operation catalog as an operation.
struct HelpHandler {
    registry: Weak<HandlerRegistry>,
}

impl Handler for HelpHandler {}

impl HandlerFactory for HelpHandler {
    fn operations() -> Vec<OperationDescriptor> {
        vec![OperationDescriptor::new("help", "Lists every operation with its signature.")
            .returns("One help entry per operation, sorted by name.")
            .handle(|handler: &HelpHandler, _args: BoundArgs| {
                let registry = handler.registry.upgrade();
                async move {
                    let registry = registry.ok_or_else(|| anyhow!("registry is gone"))?;
                    let mut entries: Vec<String> =
                        registry.operations().map(|op| op.help_text()).collect();
                    entries.sort();
                    Ok(json!(entries))
                }
                .boxed()
            })]
    }

    fn construct(registry: &Arc<HandlerRegistry>) -> anyhow::Result<Self> {
        Ok(Self {
            registry: Arc::downgrade(registry),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let registry = Arc::new(HandlerRegistry::build(vec![
        HandlerClass::of::<EchoHandler>(),
        HandlerClass::of::<HelpHandler>(),
    ])?);

    let config = ServerConfig {
        bind_addr: std::env::var("CALLWIRE_BIND").unwrap_or_else(|_| "127.0.0.1:4321".into()),
        secret: std::env::var("CALLWIRE_SECRET").ok(),
    };
    if config.secret.is_some() {
        info!("Handshake secret required");
    }

    let server = DispatchServer::new(registry, config);
    let bound = server.start().await?;
    info!("Ready for controllers on {}", bound);

    tokio::signal::ctrl_c().await?;
    server.shutdown();

    Ok(())
}
