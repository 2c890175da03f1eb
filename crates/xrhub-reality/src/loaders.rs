use std::sync::Arc;

use async_trait::async_trait;

use xrhub_core::errors::RealityError;
use xrhub_core::frame::FrameState;
use xrhub_core::session_config::{Role, SessionConfiguration};
use xrhub_core::topics;
use xrhub_session::channel::MessageChannel;
use xrhub_session::manager::SessionManager;
use xrhub_session::port::SessionPort;

use crate::viewer::{RealityViewer, ViewerType};

/// Type-specific viewer loading. Every loader ends by creating (or
/// reusing) a managed session port for the viewer's content and attaching
/// it, so the viewer's connect event fires once that port opens.
#[async_trait]
pub trait RealityLoader: Send + Sync {
    fn viewer_type(&self) -> ViewerType;

    async fn load(
        &self,
        viewer: &Arc<RealityViewer>,
        manager: &Arc<SessionManager>,
    ) -> Result<(), RealityError>;
}

/// Spin up an in-process content session for built-in realities.
fn load_in_process(
    viewer: &Arc<RealityViewer>,
    manager: &Arc<SessionManager>,
    content_config: SessionConfiguration,
) -> Result<(), RealityError> {
    let (hub_end, content_end) = MessageChannel::pair();
    let hub_port = manager.add_managed_session_port(viewer.uri())?;
    viewer.attach_session(Arc::clone(&hub_port));
    hub_port.open(hub_end, SessionConfiguration::new(Role::Manager))?;

    let content = SessionPort::new(format!("{}#content", viewer.uri()));
    // Built-in realities speak no optional protocols; the hub may still
    // probe them with topics they do not implement.
    content.set_suppress_unknown_topics(true);
    content.open(content_end, content_config)?;

    // Publish one initial frame so subscribers see the source exists.
    let content_task = Arc::clone(&content);
    tokio::spawn(async move {
        if content_task.wait_connected().await.is_ok() {
            let frame = FrameState::now();
            let _ = content_task.send(
                topics::REALITY_FRAME_STATE,
                serde_json::to_value(&frame).ok(),
            );
        }
    });
    Ok(())
}

/// `reality:empty` — a blank scene with no sensor input.
pub struct EmptyRealityLoader;

#[async_trait]
impl RealityLoader for EmptyRealityLoader {
    fn viewer_type(&self) -> ViewerType {
        ViewerType::Empty
    }

    async fn load(
        &self,
        viewer: &Arc<RealityViewer>,
        manager: &Arc<SessionManager>,
    ) -> Result<(), RealityError> {
        let mut config = SessionConfiguration::new(Role::RealityViewer);
        config.name = Some("empty".into());
        load_in_process(viewer, manager, config)
    }
}

/// `reality:live` — camera passthrough. Sensor acquisition itself lives
/// outside the core; this loader provides the content session that a
/// capture layer feeds frames into.
pub struct LiveRealityLoader;

#[async_trait]
impl RealityLoader for LiveRealityLoader {
    fn viewer_type(&self) -> ViewerType {
        ViewerType::Live
    }

    async fn load(
        &self,
        viewer: &Arc<RealityViewer>,
        manager: &Arc<SessionManager>,
    ) -> Result<(), RealityError> {
        let mut config = SessionConfiguration::new(Role::RealityViewer);
        config.name = Some("live".into());
        config.protocols = vec!["ar.live-video@v2".into()];
        load_in_process(viewer, manager, config)
    }
}

/// Arbitrary URL — content hosted in a remote context. The managed port is
/// created up front; it opens when the remote context dials in (via
/// `RealityService::attach_content_endpoint`) and identifies itself with
/// this viewer's URI.
pub struct HostedRealityLoader;

#[async_trait]
impl RealityLoader for HostedRealityLoader {
    fn viewer_type(&self) -> ViewerType {
        ViewerType::Hosted
    }

    async fn load(
        &self,
        viewer: &Arc<RealityViewer>,
        manager: &Arc<SessionManager>,
    ) -> Result<(), RealityError> {
        let hub_port = manager.add_managed_session_port(viewer.uri())?;
        viewer.attach_session(hub_port);
        tracing::debug!(uri = %viewer.uri(), "hosted reality awaiting content connection");
        Ok(())
    }
}
