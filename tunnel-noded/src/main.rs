use std::{fs, io};

use anyhow::{anyhow, Context as _, Result};
use log::*;
use tokio::io::BufReader;

use tunnel_noded::config::{parse_args_and_config, NodeArgs};
use tunnel_noded::node::run_node;
use tunnel_noded::util::{LineReader, Shutter};
use tunnel_util::config::log_directives;
use tunnel_util::observability::init_tracing_subscriber;
use tunnel_util::util::abort_on_panic;
use tunnel_util::GIT_DESC;

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<()> {
    abort_on_panic();
    let bin_name = "tunnel-noded";
    let args: NodeArgs = parse_args_and_config(bin_name);

    let datadir = args.resolve_datadir().context("no --datadir given and no home directory")?;
    fs::create_dir_all(&datadir).with_context(|| format!("mkdir {}", datadir.display()))?;
    let log_file = args.log_file(&datadir);
    let _log_guard = init_tracing_subscriber(log_file.as_ref(), &log_directives(args.verbosity))
        .map_err(|e| anyhow!("setup logging: {}", e))?;
    info!("{} git_desc={} starting", bin_name, GIT_DESC);

    let shutter = Shutter::new().context("set termination handler")?;
    let stdin = LineReader::spawn(io::BufReader::new(io::stdin())).context("read stdin")?;
    let input = BufReader::new(stdin);
    if let Err(e) = run_node(&args, &datadir, input, shutter.signal.clone()).await {
        error!("{:#}", e);
        return Err(e);
    }
    info!("{} stopped", bin_name);
    Ok(())
}
