use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use log::*;
use tokio::io::AsyncBufRead;
use tokio::task::{JoinError, JoinSet};
use triggered::Listener;

use tunnel_core::bootstrap::Bootstrapper;
use tunnel_core::channel_select::{ChannelSelector, LinePrompt};
use tunnel_core::console::{Console, ConsoleContext};
use tunnel_core::gateway::TunnelGateway;
use tunnel_core::loopback::{
    LoopbackGateway, LoopbackPaymentService, LoopbackScanner, LoopbackWalletProvider,
};
use tunnel_core::payments::{PaymentConfig, PaymentService};
use tunnel_core::sampler::StatsSampler;
use tunnel_core::scanner::ChainScanner;
use tunnel_core::stats::SectionId;
use tunnel_core::util::{Clock, TokioClock};
use tunnel_core::wallet::WalletHandle;
use tunnel_persist::{RedbChannelDb, MIGRATIONS};

use crate::config::NodeArgs;
use crate::metrics::serve_metrics;

/// Tunnel sections served by the local gateway
const SECTION_COUNT: u8 = 2;

/// What the payment side hands to the rest of the node
struct Payments {
    config: Arc<PaymentConfig>,
    wallet: WalletHandle,
    scanner: Arc<LoopbackScanner>,
}

/// Run the node until `shutdown` fires or a background service fails.
///
/// `input` feeds the counterparty prompt and then the operator console.
pub async fn run_node<R>(
    args: &NodeArgs,
    datadir: &Path,
    mut input: R,
    shutdown: Listener,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
{
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let payments = if args.payments_enabled {
        let setup = start_payments(args, datadir, &mut input, &shutdown, &clock, &mut tasks);
        match setup.await? {
            Some(payments) => Some(payments),
            // shut down while selecting a channel
            None => return Ok(()),
        }
    } else {
        info!("payments disabled");
        None
    };

    let sections: Vec<SectionId> = (0..SECTION_COUNT).map(|i| SectionId(vec![i])).collect();
    let gateway = Arc::new(LoopbackGateway::new(
        &sections,
        payments.as_ref().map(|p| p.config.clone()),
        clock.clone(),
    ));
    let background = gateway.clone();
    tasks.spawn(async move { background.start().await.context("gateway") });
    if let Some(addr) = args.metrics_listen_addr {
        tasks.spawn(serve_metrics(addr, gateway.clone()));
    }

    let sampler = Arc::new(StatsSampler::new(gateway.clone(), clock.clone()));
    let mut ctx = ConsoleContext::new(gateway, sampler.clone(), clock.clone());
    if let Some(payments) = &payments {
        ctx.payments = Some(payments.config.clone());
        ctx.wallet = Some(payments.wallet.clone());
    }
    let mut console = Console::new(input, ctx);

    let serve = async {
        console.run(shutdown.clone()).await;
        shutdown.clone().await;
    };
    let result = tokio::select! {
        biased;
        Some(res) = tasks.join_next() => background_exit(res),
        _ = serve => Ok(()),
    };

    info!("shutting down");
    sampler.stop().await;
    if let Some(payments) = &payments {
        payments.scanner.stop();
    }
    tasks.shutdown().await;
    result
}

/// Bootstrap the store and pick the channel to prioritize.
///
/// Returns `None` if shutdown fired before a channel was ready.
async fn start_payments<R>(
    args: &NodeArgs,
    datadir: &Path,
    input: &mut R,
    shutdown: &Listener,
    clock: &Arc<dyn Clock>,
    tasks: &mut JoinSet<Result<()>>,
) -> Result<Option<Payments>>
where
    R: AsyncBufRead + Unpin + Send,
{
    let db_path = args.resolve_db_path(datadir);
    let (db, fresh) = RedbChannelDb::open(&db_path)
        .with_context(|| format!("open payments db at {}", db_path.display()))?;
    let db = Arc::new(db);

    let scanner = Arc::new(LoopbackScanner::new(db.clone(), clock.clone()));
    let provider = Arc::new(LoopbackWalletProvider::new(
        db.clone(),
        args.node_key,
        args.wallet_balance,
        clock.clone(),
    ));
    let report = Bootstrapper::new(db.clone(), scanner.clone(), provider)
        .migrations(MIGRATIONS)
        .resume(fresh)
        .await
        .context("bootstrap payments")?;
    info!(
        "payments resumed from block {} with {} channels, wallet {}",
        report.cursor,
        report.replayed,
        report.wallet.wallet.address()
    );

    let service = Arc::new(LoopbackPaymentService::new(db, args.node_key, clock.clone()));
    let background = service.clone();
    tasks.spawn(async move { background.start().await.context("payment service") });

    let selector = ChannelSelector::new(service.clone(), clock.clone())
        .readiness_deadline(args.readiness_deadline());
    let mut prompt = LinePrompt::new(input);
    let selected = tokio::select! {
        biased;
        _ = shutdown.clone() => None,
        selected = selector.select_or_deploy(args.payment_node, &mut prompt) => Some(selected),
    };
    let selected = match selected {
        Some(Ok(selected)) => selected,
        Some(Err(e)) => {
            scanner.stop();
            return Err(e).context("select payment channel");
        }
        None => {
            scanner.stop();
            return Ok(None);
        }
    };
    info!("payment node with key {} is prioritized for routing", selected.counterparty);

    let config = Arc::new(PaymentConfig {
        service,
        min_price_per_packet_route: args.min_price_per_packet_route,
        min_price_per_packet_in_out: args.min_price_per_packet_in_out,
    });
    Ok(Some(Payments { config, wallet: report.wallet, scanner }))
}

/// A background service never returns while the node is healthy
fn background_exit(res: Result<Result<()>, JoinError>) -> Result<()> {
    match res {
        Ok(Ok(())) => Err(anyhow!("background service exited")),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(anyhow!(e).context("background service panicked")),
    }
}
