pub mod discovery;
pub mod monitor;
pub mod registry;
pub mod error;

pub use error::{Error, Result};
pub use discovery::{
    CatalogSubscription, ClusterCatalog, ClusterListSource, ClusterSource, CompositeClusterSource, StaticClusterSource,
};
pub use monitor::{
    ClusterMonitor, ClusterMonitorFactory, HttpClusterMonitor, HttpClusterMonitorFactory, MonitorSettings, MonitorState,
};
pub use registry::ClusterRegistry;
