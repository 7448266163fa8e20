use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use hyper::Server as HyperServer;
use structopt::StructOpt;
use tower::make::Shared;
use tower::ServiceBuilder;
use tower_http::add_extension::AddExtensionLayer;

use crate::bulk_store::webhdfs::WebHdfsBulkStore;
use crate::bulk_store::BulkStore;
use crate::coordination::memory::MemoryCoordinationStore;
use crate::coordination::CoordinationStore;
use crate::local_controller::LocalSyncController;
use crate::logging::Logger;
use crate::master_controller::MasterSyncController;
use crate::opt::Opt;
use crate::schema::SchemaRegistry;

mod bulk_store;
mod coordination;
mod errors;
mod hash_ring;
mod hashing;
mod host_registry;
mod local_controller;
mod lock;
mod logging;
mod master_controller;
mod opt;
mod retry;
mod schema;
mod segment;
mod types;

static LOGGER: Logger = Logger;

#[tokio::main]
async fn main() {
  let opt: Opt = Opt::from_args();
  opt.validate().expect("invalid configuration");
  log::set_max_level(opt.log_level);
  log::set_logger(&LOGGER).expect("unable to initialize logging");

  std::fs::create_dir_all(&opt.local_data).expect("unable to create LOCAL_DATA directory");

  // RethinkDB has no first-party async Rust driver; `trough` speaks to its
  // coordination store through this trait instead, defaulting to an
  // in-process store until a RethinkDB-backed implementation is wired in.
  // See DESIGN.md for why this seam exists.
  let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
  let bulk_store: Arc<dyn BulkStore> = Arc::new(WebHdfsBulkStore::new(&opt.hdfs_host, opt.hdfs_port));

  SchemaRegistry::new(store.clone()).seed_default().await.expect("failed to seed default schema");

  let local_controller = LocalSyncController::new(opt.clone(), store.clone(), bulk_store.clone());
  let master_controller = MasterSyncController::new(opt.clone(), store, bulk_store);

  let filter = local_controller.clone().warp_filter();
  let warp_service = warp::service(filter);
  let tower_service = ServiceBuilder::new()
    .layer(AddExtensionLayer::new(local_controller.clone()))
    .service(warp_service);
  let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], opt.sync_local_port)))
    .expect("sync-local port busy");
  log::info!("bound sync-local listener to port {}", opt.sync_local_port);
  let hyper_future = HyperServer::from_tcp(listener)
    .unwrap()
    .serve(Shared::new(tower_service));

  log::info!("ready to serve; hostname={}", opt.hostname);
  let outcomes = futures::future::join3(
    hyper_future,
    local_controller.run_forever(),
    master_controller.run_forever(),
  ).await;

  outcomes.0.expect("sync-local server crashed");
  outcomes.1.expect("local sync controller crashed");
  outcomes.2.expect("master sync controller crashed");
}
