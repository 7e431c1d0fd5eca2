//! Cloud scope shared by the RightScale handlers
//!
//! RightScale addresses everything region-specific through a cloud href
//! (`/api/clouds/1`). The cloud is looked up by name the first time it is
//! needed and then fixed for the handler's lifetime.

use stackflow_cloud::{
    CloudError, Collection, Constraint, ControlPlaneClient, HandlerContext, RemoteItem, Result,
    require_exact,
};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub(crate) struct CloudScope {
    pub(crate) session: Arc<dyn ControlPlaneClient>,
    region_name: String,
    cloud: OnceCell<RemoteItem>,
}

impl CloudScope {
    pub(crate) fn new(context: &HandlerContext) -> Self {
        Self {
            session: context.session.clone(),
            region_name: context.credentials.region().unwrap_or_default().to_string(),
            cloud: OnceCell::new(),
        }
    }

    pub(crate) fn collection(&self, path: impl Into<String>) -> Collection<'_> {
        Collection::new(self.session.as_ref(), path)
    }

    /// The cloud named by `region_name`
    pub(crate) async fn cloud(&self) -> Result<&RemoteItem> {
        self.cloud
            .get_or_try_init(|| async {
                if self.region_name.is_empty() {
                    return Err(CloudError::InvalidConfig(
                        "RightScale requires region_name to select a cloud".to_string(),
                    ));
                }
                require_exact(
                    &self.collection("/api/clouds"),
                    &[Constraint::new("name", self.region_name.as_str())],
                )
                .await
            })
            .await
    }

    /// `<cloud href>/<path>`
    pub(crate) async fn cloud_path(&self, path: &str) -> Result<String> {
        Ok(format!("{}/{}", self.cloud().await?.href, path))
    }
}
