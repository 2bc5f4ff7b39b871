//! Mensajes protobuf del stream de perfiles que envían los recorders.
//!
//! Los tags tienen que coincidir con lo que serializan los recorders,
//! no reordenar.

use chrono::{DateTime, Utc};

use crate::assignment::WorkAssignment as DomainAssignment;
use crate::work::Work as DomainWork;
use crate::work_id::WorkId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum WorkType {
    CpuSampleWork = 0,
    ThreadSampleWork = 1,
    MonitorContentionWork = 2,
    MonitorWaitWork = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CpuSampleWork {
    #[prost(uint32, tag = "1")]
    pub frequency: u32,
    #[prost(uint32, tag = "2")]
    pub max_frames: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ThreadSampleWork {
    #[prost(uint32, tag = "1")]
    pub frequency: u32,
    #[prost(uint32, tag = "2")]
    pub max_frames: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MonitorWork {
    #[prost(uint32, tag = "1")]
    pub max_monitors: u32,
    #[prost(uint32, tag = "2")]
    pub max_frames: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Work {
    #[prost(enumeration = "WorkType", tag = "1")]
    pub w_type: i32,
    #[prost(message, optional, tag = "2")]
    pub cpu_sample: Option<CpuSampleWork>,
    #[prost(message, optional, tag = "3")]
    pub thread_sample: Option<ThreadSampleWork>,
    #[prost(message, optional, tag = "4")]
    pub monitor_block: Option<MonitorWork>,
    #[prost(message, optional, tag = "5")]
    pub monitor_wait: Option<MonitorWork>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkAssignment {
    #[prost(uint64, tag = "1")]
    pub work_id: u64,
    #[prost(message, repeated, tag = "2")]
    pub work: Vec<Work>,
    #[prost(string, tag = "3")]
    pub issue_time: String,
    #[prost(uint32, tag = "4")]
    pub duration: u32,
    #[prost(uint32, tag = "5")]
    pub delay: u32,
    #[prost(string, tag = "6")]
    pub description: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordingHeader {
    #[prost(uint32, tag = "1")]
    pub recorder_version: u32,
    #[prost(uint32, tag = "2")]
    pub controller_version: u32,
    #[prost(uint32, tag = "3")]
    pub controller_id: u32,
    #[prost(message, optional, tag = "4")]
    pub work_assignment: Option<WorkAssignment>,
    #[prost(string, tag = "5")]
    pub work_description: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MethodInfo {
    #[prost(int64, tag = "1")]
    pub method_id: i64,
    #[prost(string, tag = "2")]
    pub class_fqdn: String,
    #[prost(string, tag = "3")]
    pub method_name: String,
    #[prost(string, tag = "4")]
    pub signature: String,
    #[prost(string, tag = "5")]
    pub file_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceContext {
    #[prost(uint32, tag = "1")]
    pub trace_id: u32,
    #[prost(string, tag = "2")]
    pub trace_name: String,
    #[prost(uint32, tag = "3")]
    pub coverage_pct: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexedData {
    #[prost(message, repeated, tag = "1")]
    pub method_info: Vec<MethodInfo>,
    #[prost(message, repeated, tag = "2")]
    pub trace_ctx: Vec<TraceContext>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Frame {
    #[prost(int64, tag = "1")]
    pub method_id: i64,
    #[prost(int32, tag = "2")]
    pub bci: i32,
    #[prost(int32, tag = "3")]
    pub line_no: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StackSample {
    #[prost(uint32, tag = "1")]
    pub start_offset_micros: u32,
    #[prost(uint64, tag = "2")]
    pub thread_id: u64,
    /// Frames de la hoja hacia la raíz
    #[prost(message, repeated, tag = "3")]
    pub frame: Vec<Frame>,
    #[prost(uint32, repeated, tag = "4")]
    pub trace_id: Vec<u32>,
    #[prost(bool, tag = "5")]
    pub snipped: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StackSampleWse {
    #[prost(message, repeated, tag = "1")]
    pub stack_sample: Vec<StackSample>,
}

/// Una entrada (WSE) del stream.
///
/// `w_type` tiene presencia explícita: una entrada de CPU vacía igual ocupa
/// bytes y su largo nunca se confunde con el marcador de fin.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Wse {
    #[prost(enumeration = "WorkType", optional, tag = "1")]
    pub w_type: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub indexed_data: Option<IndexedData>,
    #[prost(message, optional, tag = "3")]
    pub cpu_sample_entry: Option<StackSampleWse>,
}

impl Wse {
    pub fn of_type(work_type: WorkType) -> Self {
        Self {
            w_type: Some(work_type as i32),
            ..Default::default()
        }
    }

    pub fn work_type(&self) -> Option<WorkType> {
        WorkType::try_from(self.w_type?).ok()
    }

    pub fn sample_count(&self) -> usize {
        self.cpu_sample_entry
            .as_ref()
            .map(|e| e.stack_sample.len())
            .unwrap_or(0)
    }
}

/* --------- conversiones dominio <-> cable --------- */

impl From<&DomainWork> for Work {
    fn from(work: &DomainWork) -> Self {
        let mut out = Work::default();
        match *work {
            DomainWork::CpuSample {
                frequency,
                max_frames,
            } => {
                out.w_type = WorkType::CpuSampleWork as i32;
                out.cpu_sample = Some(CpuSampleWork {
                    frequency,
                    max_frames,
                });
            }
            DomainWork::ThreadSample {
                frequency,
                max_frames,
            } => {
                out.w_type = WorkType::ThreadSampleWork as i32;
                out.thread_sample = Some(ThreadSampleWork {
                    frequency,
                    max_frames,
                });
            }
            DomainWork::MonitorContention {
                max_monitors,
                max_frames,
            } => {
                out.w_type = WorkType::MonitorContentionWork as i32;
                out.monitor_block = Some(MonitorWork {
                    max_monitors,
                    max_frames,
                });
            }
            DomainWork::MonitorWait {
                max_monitors,
                max_frames,
            } => {
                out.w_type = WorkType::MonitorWaitWork as i32;
                out.monitor_wait = Some(MonitorWork {
                    max_monitors,
                    max_frames,
                });
            }
        }
        out
    }
}

impl Work {
    /// None si el tipo no se reconoce o falta el detalle correspondiente.
    pub fn to_domain(&self) -> Option<DomainWork> {
        match WorkType::try_from(self.w_type).ok()? {
            WorkType::CpuSampleWork => self.cpu_sample.as_ref().map(|w| DomainWork::CpuSample {
                frequency: w.frequency,
                max_frames: w.max_frames,
            }),
            WorkType::ThreadSampleWork => {
                self.thread_sample
                    .as_ref()
                    .map(|w| DomainWork::ThreadSample {
                        frequency: w.frequency,
                        max_frames: w.max_frames,
                    })
            }
            WorkType::MonitorContentionWork => {
                self.monitor_block
                    .as_ref()
                    .map(|w| DomainWork::MonitorContention {
                        max_monitors: w.max_monitors,
                        max_frames: w.max_frames,
                    })
            }
            WorkType::MonitorWaitWork => self.monitor_wait.as_ref().map(|w| DomainWork::MonitorWait {
                max_monitors: w.max_monitors,
                max_frames: w.max_frames,
            }),
        }
    }
}

impl From<&DomainAssignment> for WorkAssignment {
    fn from(a: &DomainAssignment) -> Self {
        Self {
            work_id: a.work_id.0,
            work: a.work.iter().map(Work::from).collect(),
            issue_time: a
                .issue_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            duration: a.duration,
            delay: a.delay,
            description: a.description.clone(),
        }
    }
}

impl WorkAssignment {
    pub fn work_id(&self) -> WorkId {
        WorkId(self.work_id)
    }

    /// Los `work` no reconocidos se descartan.
    pub fn to_domain(&self) -> DomainAssignment {
        DomainAssignment {
            work_id: self.work_id(),
            work: self.work.iter().filter_map(Work::to_domain).collect(),
            description: self.description.clone(),
            duration: self.duration,
            delay: self.delay,
            issue_time: DateTime::parse_from_rfc3339(&self.issue_time)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn assignment_keeps_content_across_the_wire_types() {
        let issued = DomainAssignment::new(
            WorkId::from_parts(7, 3),
            vec![
                DomainWork::CpuSample {
                    frequency: 49,
                    max_frames: 200,
                },
                DomainWork::MonitorWait {
                    max_monitors: 10,
                    max_frames: 64,
                },
            ],
            "cpu y locks".to_string(),
            60,
        )
        .issued(17, Utc::now());

        let wire = WorkAssignment::from(&issued);
        assert_eq!(wire.work_id, issued.work_id.0);
        assert_eq!(wire.delay, 17);

        let back = wire.to_domain();
        assert_eq!(back.work, issued.work);
        assert_eq!(back.description, issued.description);
        assert!(back.issue_time.is_some());
    }

    #[test]
    fn unknown_work_type_is_dropped() {
        let wire = Work {
            w_type: 99,
            ..Default::default()
        };
        assert_eq!(wire.to_domain(), None);
    }
}
