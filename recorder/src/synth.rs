//! Generación de perfiles de CPU sintéticos con el framing real del protocolo.

use bytes::{Bytes, BytesMut};
use common::proto::{
    Frame, IndexedData, MethodInfo, RecordingHeader, StackSample, StackSampleWse, TraceContext,
    WorkType, Wse,
};
use common::wire;
use common::{Work, WorkAssignment};
use rand::Rng;

pub const RECORDER_VERSION: u32 = 1;

// (clase, método, firma, archivo); el índice es el method_id
const METHODS: &[(&str, &str, &str, &str)] = &[
    ("demo.App", "main", "([Ljava/lang/String;)V", "App.java"),
    ("demo.Server", "serve", "()V", "Server.java"),
    ("demo.Handler", "handle", "(Ldemo/Request;)V", "Handler.java"),
    ("demo.Json", "encode", "(Ljava/lang/Object;)[B", "Json.java"),
    ("demo.Db", "query", "(Ljava/lang/String;)Ldemo/Rows;", "Db.java"),
    ("demo.Cache", "get", "(Ljava/lang/String;)Ljava/lang/Object;", "Cache.java"),
];

const TRACES: &[&str] = &["checkout", "search"];

/// Parámetros de muestreo de CPU de la asignación, si los pide.
pub fn cpu_sampling(assignment: &WorkAssignment) -> Option<(u32, u32)> {
    assignment.work.iter().find_map(|w| match w {
        Work::CpuSample {
            frequency,
            max_frames,
        } => Some((*frequency, *max_frames)),
        _ => None,
    })
}

pub fn header(assignment: &WorkAssignment, controller_id: u32) -> RecordingHeader {
    RecordingHeader {
        recorder_version: RECORDER_VERSION,
        controller_version: 1,
        controller_id,
        work_assignment: Some(assignment.into()),
        work_description: assignment.description.clone(),
    }
}

pub struct ProfileSynthesizer<R> {
    rng: R,
    frequency: u32,
    max_frames: u32,
    indexed_sent: bool,
    elapsed_micros: u64,
}

impl<R: Rng> ProfileSynthesizer<R> {
    pub fn new(rng: R, frequency: u32, max_frames: u32) -> Self {
        Self {
            rng,
            frequency: frequency.max(1),
            max_frames: max_frames.max(1),
            indexed_sent: false,
            elapsed_micros: 0,
        }
    }

    /// Una entrada con las muestras de `secs` segundos; `cpu_fraction` escala
    /// cuántas muestras caen en CPU.
    pub fn entry(&mut self, secs: u64, cpu_fraction: f32) -> Wse {
        let expected = self.frequency as u64 * secs;
        let count = ((expected as f32) * cpu_fraction.clamp(0.05, 1.0)).ceil() as u64;
        let step = (secs * 1_000_000) / count.max(1);

        let mut samples = Vec::with_capacity(count as usize);
        for i in 0..count {
            let offset = self.elapsed_micros + i * step;
            samples.push(self.sample(offset));
        }
        self.elapsed_micros += secs * 1_000_000;

        // el índice viaja una sola vez, en la primera entrada
        let indexed_data = if self.indexed_sent {
            None
        } else {
            self.indexed_sent = true;
            Some(index())
        };

        Wse {
            w_type: Some(WorkType::CpuSampleWork as i32),
            indexed_data,
            cpu_sample_entry: Some(StackSampleWse {
                stack_sample: samples,
            }),
        }
    }

    fn sample(&mut self, offset_micros: u64) -> StackSample {
        let max_depth = (self.max_frames as usize).min(METHODS.len());
        let depth = self.rng.gen_range(1..=max_depth);

        // de la raíz (main) hacia la hoja, después se invierte
        let mut path: Vec<i64> = vec![0];
        while path.len() < depth {
            path.push(self.rng.gen_range(1..METHODS.len()) as i64);
        }
        let frame = path
            .iter()
            .rev()
            .map(|id| Frame {
                method_id: *id,
                bci: self.rng.gen_range(0..64),
                line_no: 10 + *id as i32 * 7,
            })
            .collect();

        let trace_id = if self.rng.gen_bool(0.5) {
            vec![self.rng.gen_range(0..TRACES.len()) as u32]
        } else {
            vec![]
        };

        StackSample {
            start_offset_micros: offset_micros.min(u32::MAX as u64) as u32,
            thread_id: self.rng.gen_range(1..=8),
            frame,
            trace_id,
            snipped: depth as u32 >= self.max_frames && self.max_frames < METHODS.len() as u32,
        }
    }
}

fn index() -> IndexedData {
    IndexedData {
        method_info: METHODS
            .iter()
            .enumerate()
            .map(|(id, (class, name, sig, file))| MethodInfo {
                method_id: id as i64,
                class_fqdn: class.to_string(),
                method_name: name.to_string(),
                signature: sig.to_string(),
                file_name: file.to_string(),
            })
            .collect(),
        trace_ctx: TRACES
            .iter()
            .enumerate()
            .map(|(id, name)| TraceContext {
                trace_id: id as u32,
                trace_name: name.to_string(),
                coverage_pct: 100,
            })
            .collect(),
    }
}

/// Stream completo: header, entradas y marcador de fin.
pub struct ProfileStream {
    buf: BytesMut,
    entries: usize,
}

impl ProfileStream {
    pub fn new(header: &RecordingHeader) -> Self {
        let mut buf = BytesMut::new();
        wire::encode_header(header, &mut buf);
        Self { buf, entries: 0 }
    }

    pub fn push(&mut self, entry: &Wse) {
        wire::encode_wse(entry, &mut self.buf);
        self.entries += 1;
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn finish(mut self) -> Bytes {
        wire::encode_end_marker(&mut self.buf);
        self.buf.freeze()
    }
}
