use std::sync::Arc;
use anyhow::anyhow;
use chord_overlay::com::{
	ConnectionPool, ProxyFactory, Registry, RpcEndpoint, SocketEndpoint
};
use chord_overlay::data::{calculate_hash, Scheme, Url};
use chord_overlay::node::ChordNode;
use chord_overlay::storage::{DiskEntries, EntryStore, MemoryEntries};
use chord_overlay::com::NodeInfo;
use clap::Parser;
use log::info;

#[derive(Parser)]
struct Args {
	/// Local url to serve (socket://<host>:<port>/<name> or rpc://...)
	url: String,

	/// Join an existing node on init (url of a live peer)
	#[clap(short, long)]
	join: Option<String>,

	/// Persist entries under this directory instead of keeping them in memory
	#[clap(short, long)]
	data_dir: Option<String>
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::init();
	let args = Args::parse();

	let url: Url = args.url.parse()?;
	let info = NodeInfo {
		id: calculate_hash(url.to_string().as_bytes()),
		url: url.clone()
	};

	let entries: Arc<dyn EntryStore> = match args.data_dir.as_ref() {
		Some(dir) => Arc::new(DiskEntries::open(dir)?),
		None => Arc::new(MemoryEntries::new())
	};

	let pool = ConnectionPool::new();
	let registry = Registry::new();
	let factory = ProxyFactory::new(url.clone(), pool, registry);
	let node = ChordNode::new(info.clone(), entries, factory.clone());

	enum Serving {
		Socket(Arc<SocketEndpoint>),
		Rpc(Arc<RpcEndpoint>)
	}

	let serving = match url.scheme {
		Scheme::Socket => {
			let endpoint = SocketEndpoint::new(node.clone(), url.clone())?;
			endpoint.listen().await?;
			Serving::Socket(endpoint)
		}
		Scheme::Rpc => {
			let endpoint = RpcEndpoint::new(node.clone(), url.clone())?;
			endpoint.listen().await?;
			Serving::Rpc(endpoint)
		}
		Scheme::Local => {
			return Err(anyhow!("a server process needs a network scheme, got {}", url));
		}
	};

	if let Some(join) = args.join.as_ref() {
		let bootstrap_url: Url = join.parse()?;
		let bootstrap = factory.connect(&bootstrap_url).await?;
		node.join(bootstrap).await?;
	}

	match &serving {
		Serving::Socket(ep) => ep.accept_entries()?,
		Serving::Rpc(ep) => ep.accept_entries()?
	}
	info!("{}: serving entries", info);

	tokio::signal::ctrl_c().await?;
	info!("{}: shutting down", info);

	node.leave().await.ok();
	match serving {
		Serving::Socket(ep) => ep.close().await,
		Serving::Rpc(ep) => ep.close().await
	}
	factory.shutdown().await;
	Ok(())
}
