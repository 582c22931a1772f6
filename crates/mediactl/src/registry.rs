use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::data_producer::{DataProducer, WeakDataProducer};
use crate::producer::{Producer, WeakProducer};

/// Producers and data producers of one router, by id.
///
/// Holds weak handles only: transports own their producers, and the
/// registry merely lets siblings find them.
#[derive(Debug, Clone, Default)]
pub(crate) struct Registry {
    producers: Arc<Mutex<HashMap<String, WeakProducer>>>,
    data_producers: Arc<Mutex<HashMap<String, WeakDataProducer>>>,
}

impl Registry {
    pub(crate) fn insert_producer(&self, producer: &Producer) {
        self.producers
            .lock()
            .insert(producer.id().to_string(), producer.downgrade());
    }

    pub(crate) fn remove_producer(&self, id: &str) {
        self.producers.lock().remove(id);
    }

    /// Open producer with `id`, if any.
    pub(crate) fn producer(&self, id: &str) -> Option<Producer> {
        self.producers
            .lock()
            .get(id)
            .and_then(WeakProducer::upgrade)
            .filter(|producer| !producer.closed())
    }

    pub(crate) fn insert_data_producer(&self, data_producer: &DataProducer) {
        self.data_producers
            .lock()
            .insert(data_producer.id().to_string(), data_producer.downgrade());
    }

    pub(crate) fn remove_data_producer(&self, id: &str) {
        self.data_producers.lock().remove(id);
    }

    pub(crate) fn data_producer(&self, id: &str) -> Option<DataProducer> {
        self.data_producers
            .lock()
            .get(id)
            .and_then(WeakDataProducer::upgrade)
            .filter(|data_producer| !data_producer.closed())
    }
}
