//! Agregación de muestras de CPU en árboles de llamadas, uno por trace.

use std::collections::{BTreeMap, HashMap};

use common::proto::{Wse, WorkType};
use serde::Serialize;

use crate::error::AggregateError;
use crate::ingest::RecordedProfileIndexes;

pub const GLOBAL_ROOT_METHOD_ID: i64 = -1;
pub const UNCLASSIFIABLE_ROOT_METHOD_ID: i64 = -2;

const GLOBAL_ROOT_SIGNATURE: &str = "~ ROOT ~.()";
const UNCLASSIFIABLE_ROOT_SIGNATURE: &str = "~ UNCLASSIFIABLE ~.()";

/// Trace al que van las muestras que no traen ningún trace_id.
pub const DEFAULT_TRACE_NAME: &str = "~ OTHERS ~";

/// Ids de método a nivel ventana. Los streams usan sus propios ids; acá se
/// unifican por firma.
#[derive(Debug)]
pub struct MethodIdLookup {
    ids: HashMap<String, i64>,
    next_id: i64,
}

impl Default for MethodIdLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodIdLookup {
    pub fn new() -> Self {
        let mut ids = HashMap::new();
        ids.insert(GLOBAL_ROOT_SIGNATURE.to_string(), GLOBAL_ROOT_METHOD_ID);
        ids.insert(
            UNCLASSIFIABLE_ROOT_SIGNATURE.to_string(),
            UNCLASSIFIABLE_ROOT_METHOD_ID,
        );
        Self { ids, next_id: 0 }
    }

    pub fn get_or_add(&mut self, signature: &str) -> i64 {
        if let Some(id) = self.ids.get(signature) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(signature.to_string(), id);
        id
    }

    /// Firmas indexadas por `method_id + 2`; los reservados ocupan 0 y 1.
    pub fn reverse_lookup(&self) -> Vec<String> {
        let mut out = vec![String::new(); self.ids.len()];
        for (signature, id) in &self.ids {
            out[(*id + 2) as usize] = signature.clone();
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallTreeNode {
    pub method_id: i64,
    pub line_no: i32,
    pub on_stack_samples: u64,
    pub on_cpu_samples: u64,
    pub children: Vec<CallTreeNode>,
}

impl CallTreeNode {
    fn new(method_id: i64, line_no: i32) -> Self {
        Self {
            method_id,
            line_no,
            on_stack_samples: 0,
            on_cpu_samples: 0,
            children: Vec::new(),
        }
    }

    fn child(&mut self, method_id: i64, line_no: i32) -> &mut CallTreeNode {
        let pos = match self
            .children
            .iter()
            .position(|c| c.method_id == method_id && c.line_no == line_no)
        {
            Some(pos) => pos,
            None => {
                self.children.push(CallTreeNode::new(method_id, line_no));
                self.children.len() - 1
            }
        };
        &mut self.children[pos]
    }
}

/// Resultado inmutable de una agregación.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedSamples {
    pub method_lookup: Vec<String>,
    pub traces: BTreeMap<String, CallTreeNode>,
    pub samples: u64,
}

/// Matemática de agregación que se inyecta en cada ventana.
pub trait ProfileAggregator: Send {
    fn aggregate(
        &mut self,
        entry: &Wse,
        indexes: &RecordedProfileIndexes,
    ) -> Result<(), AggregateError>;

    fn finalize(&self) -> AggregatedSamples;
}

#[derive(Debug, Default)]
pub struct CpuSamplingAggregator {
    methods: MethodIdLookup,
    traces: HashMap<String, CallTreeNode>,
    samples: u64,
}

impl CpuSamplingAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileAggregator for CpuSamplingAggregator {
    fn aggregate(
        &mut self,
        entry: &Wse,
        indexes: &RecordedProfileIndexes,
    ) -> Result<(), AggregateError> {
        match entry.work_type() {
            Some(WorkType::CpuSampleWork) => {}
            // otros tipos de trabajo sólo suman a los contadores de la ventana
            Some(_) => return Ok(()),
            None => {
                return Err(match entry.w_type {
                    Some(raw) => AggregateError::UnsupportedWorkType(raw),
                    None => AggregateError::MissingWorkType,
                })
            }
        }
        let Some(stack_samples) = &entry.cpu_sample_entry else {
            return Ok(());
        };

        // se resuelve la entrada completa antes de tocar el árbol, así una
        // muestra inválida no deja conteos a medias
        let mut resolved = Vec::with_capacity(stack_samples.stack_sample.len());
        for sample in &stack_samples.stack_sample {
            let mut path = Vec::with_capacity(sample.frame.len());
            for frame in sample.frame.iter().rev() {
                let signature = indexes
                    .method(frame.method_id)
                    .ok_or(AggregateError::UnknownMethodId(frame.method_id))?;
                path.push((signature, frame.line_no));
            }

            let mut trace_names: Vec<String> = sample
                .trace_id
                .iter()
                .filter_map(|id| indexes.trace(*id).map(str::to_string))
                .collect();
            if trace_names.is_empty() {
                trace_names.push(DEFAULT_TRACE_NAME.to_string());
            }
            resolved.push((sample.snipped, path, trace_names));
        }

        for (snipped, signatures, trace_names) in resolved {
            let mut path = Vec::with_capacity(signatures.len() + 1);
            if snipped {
                path.push((UNCLASSIFIABLE_ROOT_METHOD_ID, 0));
            }
            for (signature, line_no) in signatures {
                path.push((self.methods.get_or_add(signature), line_no));
            }

            for trace in trace_names {
                let mut node = self
                    .traces
                    .entry(trace)
                    .or_insert_with(|| CallTreeNode::new(GLOBAL_ROOT_METHOD_ID, 0));
                node.on_stack_samples += 1;
                for (method_id, line_no) in &path {
                    node = node.child(*method_id, *line_no);
                    node.on_stack_samples += 1;
                }
                node.on_cpu_samples += 1;
            }
            self.samples += 1;
        }
        Ok(())
    }

    fn finalize(&self) -> AggregatedSamples {
        AggregatedSamples {
            method_lookup: self.methods.reverse_lookup(),
            traces: self
                .traces
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            samples: self.samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::proto::{Frame, IndexedData, MethodInfo, StackSample, StackSampleWse, TraceContext};
    use pretty_assertions::assert_eq;

    fn method(id: i64, name: &str) -> MethodInfo {
        MethodInfo {
            method_id: id,
            class_fqdn: "app.Main".to_string(),
            method_name: name.to_string(),
            signature: "()V".to_string(),
            file_name: "Main.java".to_string(),
        }
    }

    fn frame(method_id: i64, line_no: i32) -> Frame {
        Frame {
            method_id,
            bci: 0,
            line_no,
        }
    }

    fn indexes() -> RecordedProfileIndexes {
        let mut idx = RecordedProfileIndexes::new();
        idx.update(Some(&IndexedData {
            method_info: vec![method(10, "main"), method(11, "work"), method(12, "spin")],
            trace_ctx: vec![TraceContext {
                trace_id: 1,
                trace_name: "checkout".to_string(),
                coverage_pct: 5,
            }],
        }));
        idx
    }

    fn cpu_entry(samples: Vec<StackSample>) -> Wse {
        Wse {
            w_type: Some(WorkType::CpuSampleWork as i32),
            indexed_data: None,
            cpu_sample_entry: Some(StackSampleWse {
                stack_sample: samples,
            }),
        }
    }

    #[test]
    fn method_lookup_reserves_two_slots() {
        let mut lookup = MethodIdLookup::new();
        assert_eq!(lookup.get_or_add("a.B.c()V"), 0);
        assert_eq!(lookup.get_or_add("a.B.d()V"), 1);
        assert_eq!(lookup.get_or_add("a.B.c()V"), 0);

        let reverse = lookup.reverse_lookup();
        assert_eq!(reverse.len(), 4);
        assert_eq!(reverse[(GLOBAL_ROOT_METHOD_ID + 2) as usize], GLOBAL_ROOT_SIGNATURE);
        assert_eq!(
            reverse[(UNCLASSIFIABLE_ROOT_METHOD_ID + 2) as usize],
            UNCLASSIFIABLE_ROOT_SIGNATURE
        );
        assert_eq!(reverse[2], "a.B.c()V");
        assert_eq!(reverse[3], "a.B.d()V");
    }

    #[test]
    fn samples_build_a_tree_per_trace() {
        let mut agg = CpuSamplingAggregator::new();
        let idx = indexes();
        let entry = cpu_entry(vec![
            // frames de hoja a raíz
            StackSample {
                start_offset_micros: 0,
                thread_id: 1,
                frame: vec![frame(12, 30), frame(11, 20), frame(10, 10)],
                trace_id: vec![1],
                snipped: false,
            },
            StackSample {
                start_offset_micros: 10,
                thread_id: 1,
                frame: vec![frame(11, 20), frame(10, 10)],
                trace_id: vec![1],
                snipped: false,
            },
        ]);
        agg.aggregate(&entry, &idx).unwrap();

        let out = agg.finalize();
        assert_eq!(out.samples, 2);
        let root = &out.traces["checkout"];
        assert_eq!(root.method_id, GLOBAL_ROOT_METHOD_ID);
        assert_eq!(root.on_stack_samples, 2);

        let main = &root.children[0];
        assert_eq!(out.method_lookup[(main.method_id + 2) as usize], "app.Main.main()V");
        assert_eq!(main.on_stack_samples, 2);
        assert_eq!(main.on_cpu_samples, 0);

        let work = &main.children[0];
        assert_eq!(work.on_stack_samples, 2);
        assert_eq!(work.on_cpu_samples, 1);
        assert_eq!(work.children[0].on_cpu_samples, 1);
    }

    #[test]
    fn snipped_and_untraced_samples() {
        let mut agg = CpuSamplingAggregator::new();
        let idx = indexes();
        let entry = cpu_entry(vec![StackSample {
            start_offset_micros: 0,
            thread_id: 2,
            frame: vec![frame(12, 30)],
            trace_id: vec![],
            snipped: true,
        }]);
        agg.aggregate(&entry, &idx).unwrap();

        let out = agg.finalize();
        let root = &out.traces[DEFAULT_TRACE_NAME];
        assert_eq!(root.children[0].method_id, UNCLASSIFIABLE_ROOT_METHOD_ID);
        assert_eq!(root.children[0].children[0].on_cpu_samples, 1);
    }

    #[test]
    fn unknown_method_id_fails_without_partial_counts() {
        let mut agg = CpuSamplingAggregator::new();
        let idx = indexes();
        let entry = cpu_entry(vec![StackSample {
            start_offset_micros: 0,
            thread_id: 1,
            frame: vec![frame(99, 1), frame(10, 10)],
            trace_id: vec![1],
            snipped: false,
        }]);
        assert_eq!(
            agg.aggregate(&entry, &idx),
            Err(AggregateError::UnknownMethodId(99))
        );
        assert!(agg.finalize().traces.is_empty());
    }

    #[test]
    fn one_bad_sample_rejects_the_whole_entry() {
        let mut agg = CpuSamplingAggregator::new();
        let idx = indexes();
        let entry = cpu_entry(vec![
            StackSample {
                start_offset_micros: 0,
                thread_id: 1,
                frame: vec![frame(11, 20), frame(10, 10)],
                trace_id: vec![1],
                snipped: false,
            },
            StackSample {
                start_offset_micros: 10,
                thread_id: 2,
                frame: vec![frame(77, 1)],
                trace_id: vec![1],
                snipped: false,
            },
        ]);
        assert_eq!(
            agg.aggregate(&entry, &idx),
            Err(AggregateError::UnknownMethodId(77))
        );
        let out = agg.finalize();
        assert!(out.traces.is_empty());
        assert_eq!(out.samples, 0);
        // tampoco quedan métodos registrados
        assert_eq!(out.method_lookup.len(), 2);
    }

    #[test]
    fn entry_without_work_type_is_rejected() {
        let mut agg = CpuSamplingAggregator::new();
        assert_eq!(
            agg.aggregate(&Wse::default(), &indexes()),
            Err(AggregateError::MissingWorkType)
        );
    }

    #[test]
    fn unknown_work_type_is_rejected() {
        let mut agg = CpuSamplingAggregator::new();
        let entry = Wse {
            w_type: Some(42),
            ..Default::default()
        };
        assert_eq!(
            agg.aggregate(&entry, &indexes()),
            Err(AggregateError::UnsupportedWorkType(42))
        );
    }
}
