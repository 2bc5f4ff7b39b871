use std::collections::HashMap;

use common::proto::IndexedData;

/// Índices acumulados de un stream: method_id -> firma y trace_id -> nombre.
///
/// Cada WSE trae sólo los deltas; hay que mergearlos antes de interpretar
/// los frames de esa misma entrada.
#[derive(Debug, Default)]
pub struct RecordedProfileIndexes {
    methods: HashMap<i64, String>,
    traces: HashMap<u32, String>,
}

impl RecordedProfileIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, indexed: Option<&IndexedData>) {
        let Some(indexed) = indexed else {
            return;
        };
        for m in &indexed.method_info {
            let signature = format!("{}.{}{}", m.class_fqdn, m.method_name, m.signature);
            self.methods.insert(m.method_id, signature);
        }
        for t in &indexed.trace_ctx {
            self.traces.insert(t.trace_id, t.trace_name.clone());
        }
    }

    pub fn method(&self, method_id: i64) -> Option<&str> {
        self.methods.get(&method_id).map(String::as_str)
    }

    pub fn trace(&self, trace_id: u32) -> Option<&str> {
        self.traces.get(&trace_id).map(String::as_str)
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}
