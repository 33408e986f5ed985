//! Traversal over a chain of layered coin views.

use crate::view::CoinView;
use std::sync::Arc;

/// A configured chain of coin views, entered at the top layer.
///
/// Layers are discovered by walking [`CoinView::backing`] links, so the
/// stack itself stores nothing but the entry point.
#[derive(Clone)]
pub struct CoinViewStack {
    top: Arc<dyn CoinView>,
}

impl CoinViewStack {
    pub fn new(top: Arc<dyn CoinView>) -> Self {
        Self { top }
    }

    /// The layer callers should talk to.
    pub fn top(&self) -> Arc<dyn CoinView> {
        self.top.clone()
    }

    /// All layers from top to bottom.
    pub fn layers(&self) -> impl Iterator<Item = Arc<dyn CoinView>> {
        let mut next = Some(self.top.clone());
        std::iter::from_fn(move || {
            let current = next.take()?;
            next = current.backing();
            Some(current)
        })
    }

    /// The innermost (durable) layer.
    pub fn bottom(&self) -> Arc<dyn CoinView> {
        self.layers()
            .last()
            .expect("stack always contains its top layer; qed")
    }

    /// The topmost layer of concrete type `T`, if any.
    pub fn find<T: CoinView>(&self) -> Option<Arc<T>> {
        self.layers()
            .find_map(|layer| layer.as_any().downcast::<T>().ok())
    }
}
