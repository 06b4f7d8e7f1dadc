use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::embed::{Container, EmbedOptions, EmbedWidget, MountedNode, NodeHandle};
use crate::token::CancelToken;

pub const EMBED_MARGIN: u16 = 20;
pub const MAX_EMBED_WIDTH: u16 = 500;

pub fn embed_width(viewport: u16, max_width: u16) -> u16 {
    viewport.saturating_sub(EMBED_MARGIN).min(max_width)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    Idle,
    Loading,
    Found(MountedNode),
    NotFound,
    Failed(String),
}

/// One-shot notification emitted when the current mount settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettled {
    pub post_id: String,
    pub found: bool,
}

struct RenderResponse {
    request_id: u64,
    result: Result<Option<NodeHandle>>,
}

struct CurrentMount {
    request_id: u64,
    post_id: String,
    cancel: CancelToken,
    node: Option<NodeHandle>,
    settled: bool,
}

/// Keeps at most one post mounted in the shared [`Container`].
///
/// Changing the post never waits for the previous render: its node is torn
/// down whenever that render resolves, even if the renderer is gone by then.
pub struct PostRenderer {
    widget: Arc<dyn EmbedWidget>,
    container: Arc<Container>,
    max_width: u16,
    response_tx: Sender<RenderResponse>,
    response_rx: Receiver<RenderResponse>,
    next_request_id: u64,
    current: Option<CurrentMount>,
    status: RenderStatus,
}

impl PostRenderer {
    pub fn new(widget: Arc<dyn EmbedWidget>, max_width: u16) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            widget,
            container: Arc::new(Container::new()),
            max_width,
            response_tx,
            response_rx,
            next_request_id: 1,
            current: None,
            status: RenderStatus::Idle,
        }
    }

    pub fn status(&self) -> &RenderStatus {
        &self.status
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, RenderStatus::Loading)
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn current_post(&self) -> Option<&str> {
        self.current.as_ref().map(|mount| mount.post_id.as_str())
    }

    /// Mounts `post_id`, replacing whatever is mounted. Showing the post that
    /// is already mounted is a no-op.
    pub fn show(&mut self, post_id: &str, viewport_width: u16) {
        if self.current_post() == Some(post_id) {
            return;
        }
        self.retire_current();

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let cancel = CancelToken::new();
        self.current = Some(CurrentMount {
            request_id,
            post_id: post_id.to_string(),
            cancel: cancel.clone(),
            node: None,
            settled: false,
        });
        self.status = RenderStatus::Loading;

        let options = EmbedOptions {
            width: embed_width(viewport_width, self.max_width),
        };
        debug!(request_id, post_id, width = options.width, "mounting post");

        let tx = self.response_tx.clone();
        let widget = self.widget.clone();
        let container = self.container.clone();
        let post_id = post_id.to_string();
        thread::spawn(move || {
            let result = widget.render(&post_id, &container, options);
            if cancel.is_cancelled() {
                if let Ok(Some(node)) = result {
                    widget.teardown(&container, node);
                }
                return;
            }
            if let Err(err) = tx.send(RenderResponse { request_id, result }) {
                if let Ok(Some(node)) = err.into_inner().result {
                    widget.teardown(&container, node);
                }
            }
        });
    }

    pub fn unmount(&mut self) {
        self.retire_current();
        self.status = RenderStatus::Idle;
    }

    fn retire_current(&mut self) {
        let Some(previous) = self.current.take() else {
            return;
        };
        if previous.settled {
            if let Some(node) = previous.node {
                debug!(post_id = %previous.post_id, "detaching previous post");
                self.widget.teardown(&self.container, node);
            }
        } else {
            previous.cancel.cancel();
        }
    }

    /// Drains finished renders. Returns a notification for each settle of the
    /// current mount; superseded renders are torn down silently.
    pub fn poll(&mut self) -> Vec<RenderSettled> {
        let mut settled = Vec::new();
        while let Ok(response) = self.response_rx.try_recv() {
            if let Some(event) = self.handle_response(response) {
                settled.push(event);
            }
        }
        settled
    }

    /// Blocks until the current mount settles or the timeout elapses.
    pub fn wait_settled(&mut self, timeout: Duration) -> Option<RenderSettled> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            let response = self.response_rx.recv_timeout(remaining).ok()?;
            if let Some(event) = self.handle_response(response) {
                return Some(event);
            }
        }
    }

    fn handle_response(&mut self, response: RenderResponse) -> Option<RenderSettled> {
        let RenderResponse { request_id, result } = response;
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|mount| mount.request_id == request_id && !mount.settled);
        if !is_current {
            if let Ok(Some(node)) = result {
                debug!(request_id, "tearing down superseded render");
                self.widget.teardown(&self.container, node);
            }
            return None;
        }

        let mount = self.current.as_mut()?;
        mount.settled = true;
        let post_id = mount.post_id.clone();
        let (status, found) = match result {
            Ok(Some(node)) => {
                mount.node = Some(node);
                match self.container.get(node) {
                    Some(mounted) => (RenderStatus::Found(mounted), true),
                    None => (RenderStatus::NotFound, false),
                }
            }
            Ok(None) => (RenderStatus::NotFound, false),
            Err(err) => {
                warn!(post_id = %post_id, error = %err, "post render failed");
                (RenderStatus::Failed(format!("{err:#}")), false)
            }
        };
        debug!(post_id = %post_id, found, "post settled");
        self.status = status;
        Some(RenderSettled { post_id, found })
    }
}

impl Drop for PostRenderer {
    fn drop(&mut self) {
        self.retire_current();
        // Renders that resolved before the drop are still queued.
        for response in self.response_rx.try_iter() {
            if let Ok(Some(node)) = response.result {
                self.widget.teardown(&self.container, node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{MockEmbedWidget, RenderedPost};
    use std::collections::HashMap;
    use anyhow::anyhow;
    use crossbeam_channel::bounded;
    use parking_lot::Mutex;

    /// Widget whose renders block until the test releases them.
    struct GatedWidget {
        gates: Mutex<HashMap<String, Receiver<()>>>,
        teardowns: Mutex<Vec<String>>,
    }

    impl GatedWidget {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gates: Mutex::new(HashMap::new()),
                teardowns: Mutex::new(Vec::new()),
            })
        }

        fn gate(&self, post_id: &str) -> Sender<()> {
            let (tx, rx) = bounded(1);
            self.gates.lock().insert(post_id.to_string(), rx);
            tx
        }
    }

    impl EmbedWidget for GatedWidget {
        fn render(
            &self,
            post_id: &str,
            container: &Container,
            _options: EmbedOptions,
        ) -> Result<Option<NodeHandle>> {
            let gate = self.gates.lock().remove(post_id);
            if let Some(gate) = gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            match post_id {
                "missing" => Ok(None),
                "broken" => Err(anyhow!("connection refused")),
                _ => Ok(Some(container.attach(
                    post_id,
                    RenderedPost {
                        text: format!("body of {post_id}"),
                        author: None,
                        permalink: format!("https://example.invalid/{post_id}"),
                    },
                ))),
            }
        }

        fn teardown(&self, container: &Container, node: NodeHandle) {
            if let Some(mounted) = container.get(node) {
                self.teardowns.lock().push(mounted.post_id);
            }
            container.remove(node);
        }
    }

    fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn width_respects_margin_and_cap() {
        assert_eq!(embed_width(80, MAX_EMBED_WIDTH), 60);
        assert_eq!(embed_width(1000, MAX_EMBED_WIDTH), 500);
        assert_eq!(embed_width(10, MAX_EMBED_WIDTH), 0);
    }

    #[test]
    fn found_post_settles_once() {
        let widget = GatedWidget::new();
        let mut renderer = PostRenderer::new(widget, MAX_EMBED_WIDTH);
        renderer.show("100", 80);
        assert!(renderer.is_loading());

        let settled = renderer.wait_settled(Duration::from_secs(5)).unwrap();
        assert_eq!(
            settled,
            RenderSettled {
                post_id: "100".into(),
                found: true
            }
        );
        match renderer.status() {
            RenderStatus::Found(node) => assert_eq!(node.text, "body of 100"),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(renderer.poll().is_empty());

        renderer.show("100", 80);
        assert!(!renderer.is_loading());
        assert_eq!(renderer.container().len(), 1);
    }

    #[test]
    fn missing_post_reports_not_found() {
        let mut renderer = PostRenderer::new(GatedWidget::new(), MAX_EMBED_WIDTH);
        renderer.show("missing", 80);
        let settled = renderer.wait_settled(Duration::from_secs(5)).unwrap();
        assert!(!settled.found);
        assert_eq!(renderer.status(), &RenderStatus::NotFound);
        assert!(renderer.container().is_empty());
    }

    #[test]
    fn failed_render_still_settles() {
        let mut renderer = PostRenderer::new(GatedWidget::new(), MAX_EMBED_WIDTH);
        renderer.show("broken", 80);
        let settled = renderer.wait_settled(Duration::from_secs(5)).unwrap();
        assert!(!settled.found);
        assert!(matches!(renderer.status(), RenderStatus::Failed(msg) if msg.contains("refused")));
    }

    #[test]
    fn switching_posts_detaches_settled_node() {
        let widget = GatedWidget::new();
        let mut renderer = PostRenderer::new(widget.clone(), MAX_EMBED_WIDTH);
        renderer.show("1", 80);
        renderer.wait_settled(Duration::from_secs(5)).unwrap();
        renderer.show("2", 80);
        renderer.wait_settled(Duration::from_secs(5)).unwrap();

        assert_eq!(*widget.teardowns.lock(), vec!["1".to_string()]);
        assert_eq!(renderer.container().len(), 1);
    }

    #[test]
    fn superseded_pending_render_is_torn_down_when_it_resolves() {
        let widget = GatedWidget::new();
        let release_first = widget.gate("1");
        let mut renderer = PostRenderer::new(widget.clone(), MAX_EMBED_WIDTH);
        renderer.show("1", 80);
        renderer.show("2", 80);

        let settled = renderer.wait_settled(Duration::from_secs(5)).unwrap();
        assert_eq!(settled.post_id, "2");

        release_first.send(()).unwrap();
        assert!(wait_for(|| widget.teardowns.lock().contains(&"1".to_string())));
        assert!(renderer.poll().is_empty());
        assert_eq!(renderer.container().len(), 1);
        match renderer.status() {
            RenderStatus::Found(node) => assert_eq!(node.post_id, "2"),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn pending_render_is_torn_down_after_drop() {
        let widget = GatedWidget::new();
        let release = widget.gate("late");
        let mut renderer = PostRenderer::new(widget.clone(), MAX_EMBED_WIDTH);
        renderer.show("late", 80);
        let container = renderer.container().clone();
        drop(renderer);

        release.send(()).unwrap();
        assert!(wait_for(|| widget.teardowns.lock().contains(&"late".to_string())));
        assert!(container.is_empty());
    }

    #[test]
    fn rapid_switching_leaves_only_last_post_mounted() {
        let mut renderer = PostRenderer::new(Arc::new(MockEmbedWidget), MAX_EMBED_WIDTH);
        for id in 0..50 {
            renderer.show(&id.to_string(), 80);
        }
        let settled = renderer.wait_settled(Duration::from_secs(5)).unwrap();
        assert_eq!(settled.post_id, "49");
        let container = renderer.container().clone();
        assert!(wait_for(|| {
            renderer.poll();
            container.len() == 1
        }));
        assert_eq!(renderer.current_post(), Some("49"));
    }

    #[test]
    fn queued_render_is_torn_down_on_drop() {
        let widget = GatedWidget::new();
        let mut renderer = PostRenderer::new(widget.clone(), MAX_EMBED_WIDTH);
        renderer.show("queued", 80);
        let container = renderer.container().clone();
        assert!(wait_for(|| container.len() == 1));
        assert!(wait_for(|| !renderer.response_rx.is_empty()));
        drop(renderer);

        assert!(container.is_empty());
        assert_eq!(*widget.teardowns.lock(), vec!["queued".to_string()]);
    }
}
