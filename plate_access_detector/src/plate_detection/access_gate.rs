use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use plate_access::{
    AccessController, AdmissionSummary, PermissionRegistry, PlateRead, RegionReport,
};
use rusted_pipe::channels::read_channel::InputGenerator;
use rusted_pipe::channels::typed_read_channel::ReadChannel1;
use rusted_pipe::channels::typed_write_channel::WriteChannel1;
use rusted_pipe::graph::processor::Processor;
use rusted_pipe::graph::processor::ProcessorWriter;
use rusted_pipe::RustedPipeError;
use tracing::{debug, info};

/// Graph node admitting the plates read on each frame.
///
/// Reads of one frame go through the controller in detection order, so an
/// authorized plate early in the frame suppresses the ones after it.
pub struct AccessGate<R: PermissionRegistry + ?Sized> {
    controller: AccessController<R>,
}

/// Wall-clock time of a frame from its version stamp (ns since the epoch).
pub fn capture_time(timestamp_ns: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from(UNIX_EPOCH + Duration::from_nanos(timestamp_ns))
}

impl<R: PermissionRegistry + ?Sized> AccessGate<R> {
    pub fn new(controller: AccessController<R>) -> Self {
        Self { controller }
    }
}

impl<R: PermissionRegistry + ?Sized + 'static> Processor for AccessGate<R> {
    type INPUT = ReadChannel1<Vec<PlateRead>>;
    type OUTPUT = WriteChannel1<Vec<RegionReport>>;
    fn handle(
        &mut self,
        mut input: <Self::INPUT as InputGenerator>::INPUT,
        mut output: ProcessorWriter<Self::OUTPUT>,
    ) -> Result<(), RustedPipeError> {
        let Some(reads) = input.c1_owned() else {
            return Ok(());
        };
        debug!("Access gate {}", reads.version.timestamp_ns);

        let captured_at = capture_time(reads.version.timestamp_ns as u64);
        let reports = self.controller.admit_all(reads.data, captured_at);
        for report in reports.iter().filter(|report| report.admission.is_persisted()) {
            let summary = AdmissionSummary::from(&report.admission);
            info!(
                plate = summary.plate.as_deref().unwrap_or_default(),
                authorized = summary.authorized,
                record = summary.record_id,
                "Detection recorded"
            );
        }

        output
            .writer
            .c1()
            .write(reports, &reads.version)
            .expect("Cannot write to output buffer");
        Ok(())
    }
}
