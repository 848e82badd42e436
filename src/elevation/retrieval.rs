use crate::tile_matrix::{TileKey, TileMatrix};

/// The outcome of one tile retrieval, reported back to the coverage.
#[derive(Clone, Debug)]
pub enum Retrieval {
    /// Row-major i16 samples, exactly `tile_width * tile_height` of them.
    Succeeded { key: TileKey, samples: Vec<i16> },
    Failed { key: TileKey },
}

/// The completion handle passed to an [`ElevationSource`]. Cloneable and safe
/// to call from any thread or task; completions are queued and applied on the
/// next coverage query.
#[derive(Clone)]
pub struct RetrievalSink {
    sender: async_channel::Sender<Retrieval>,
}

impl RetrievalSink {
    pub(crate) fn new(sender: async_channel::Sender<Retrieval>) -> Self {
        Self { sender }
    }

    pub fn succeeded(&self, key: TileKey, samples: Vec<i16>) {
        // The channel is unbounded; send only fails once the coverage is gone.
        let _ = self.sender.try_send(Retrieval::Succeeded { key, samples });
    }

    pub fn failed(&self, key: TileKey) {
        let _ = self.sender.try_send(Retrieval::Failed { key });
    }
}

/// The abstract fetch collaborator behind the elevation coverage.
///
/// `retrieve_tile_array` must not block: implementations hand the request to
/// their own async machinery (task pool, network client, file reader) and
/// deliver the outcome through the sink whenever it completes. There is no
/// cancellation; late completions are still applied and cached.
pub trait ElevationSource: Send + Sync {
    fn retrieve_tile_array(
        &self,
        key: TileKey,
        matrix: &TileMatrix,
        row: u32,
        col: u32,
        sink: RetrievalSink,
    );
}
