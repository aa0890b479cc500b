use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use crossbeam::channel::Receiver;
use opencv::core::Size;
use plate_access::config::{AppConfig, SourceKind};
use plate_access::{AccessController, DebounceGate};
use plate_access_detector::plate_detection::access_gate::AccessGate;
use plate_access_detector::plate_detection::bounding_box_render::BoundingBoxRender;
use plate_access_detector::plate_detection::dnn_ocr::DnnOcrReader;
use plate_access_detector::plate_detection::object_detector::ObjectDetector;
use plate_access_detector::plate_detection::video_reader::VideoReader;
use plate_access_detector::setup::{self, Profiler};
use rusted_pipe::buffers::synchronizers::timestamp::TimestampSynchronizer;
use rusted_pipe::graph::build::{link, Graph};
use rusted_pipe::graph::metrics::Metrics;
use rusted_pipe::graph::processor::{Node, SourceNode, TerminalNode};
use tracing::info;

/// Frames kept for the renderer while inference catches up.
const RENDER_BUFFER: usize = 2000;

/// Watch a camera or video and record plates at the gate.
#[derive(Parser, Debug)]
#[command(name = "plates_stream")]
struct Args {
    #[arg(short, long, default_value = "plate_access.toml")]
    config: PathBuf,

    /// Read this video instead of the configured source
    #[arg(long, conflicts_with = "camera")]
    video: Option<PathBuf>,

    /// Read this camera instead of the configured source
    #[arg(long)]
    camera: Option<i32>,

    /// Save the annotated stream to the output directory
    #[arg(long)]
    save_video: bool,

    /// Stop after this many seconds
    #[arg(long)]
    run_for: Option<u64>,
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(path) = args.video.as_ref() {
        config.source.kind = SourceKind::Video;
        config.source.path = Some(path.clone());
    }
    if let Some(index) = args.camera {
        config.source.kind = SourceKind::Camera;
        config.source.camera_index = index;
    }
    if args.save_video {
        config.output.save_video = true;
    }
    if args.run_for.is_some() {
        config.graph.run_for_secs = args.run_for;
    }
}

fn video_reader(config: &AppConfig) -> Result<VideoReader> {
    let source = &config.source;
    let reader = match (source.kind, source.path.as_ref()) {
        (SourceKind::Camera, _) => VideoReader::camera(source.camera_index, source)?,
        (SourceKind::Video, Some(path)) => VideoReader::from_file(path, source)?,
        (SourceKind::Video, None) => bail!("source.path is required for video sources"),
        (SourceKind::Image, _) => bail!("Image sources are handled by plates_image"),
    };
    Ok(reader)
}

fn renderer(config: &AppConfig) -> Result<BoundingBoxRender> {
    if !config.output.save_video {
        return Ok(BoundingBoxRender::default());
    }
    std::fs::create_dir_all(&config.output.directory)?;
    let render = BoundingBoxRender::with_save_to_file(
        &config.output.directory.join("annotated.avi"),
        config.source.fps as f64,
        Size::new(config.source.frame_width, config.source.frame_height),
    )?;
    Ok(render)
}

fn link_error<E: std::fmt::Debug>(e: E) -> anyhow::Error {
    anyhow!("Cannot link nodes: {:?}", e)
}

fn setup_graph(config: &AppConfig) -> Result<(Graph, Receiver<bool>)> {
    let registry = setup::open_registry(&config.registry)?;
    let gate = Arc::new(DebounceGate::new(config.gate.suppression_window()));
    let controller = AccessController::new(registry, gate);

    let reader = video_reader(config)?;
    let done_channel = reader.get_done_event();
    let graph_config = &config.graph;
    let timestamp_synch = TimestampSynchronizer::default();

    // Node that reads frames from the camera or file
    let mut video_input_node = SourceNode::create_common("video_input".to_string(), Box::new(reader));

    // Node that finds plates on each frame
    let mut plate_detector_node = Node::create_common(
        "plate_detector".to_string(),
        Box::new(ObjectDetector::plate_detector(&config.detector)?),
        graph_config.block_channel_full,
        graph_config.channel_buffer_size,
        graph_config.process_buffer_size,
        Box::new(timestamp_synch.clone()),
        true,
    );

    // Node that reads the text of each plate
    let mut ocr_node = Node::create_common(
        "ocr_detector".to_string(),
        Box::new(DnnOcrReader::new(&config.ocr)?),
        graph_config.block_channel_full,
        graph_config.channel_buffer_size,
        graph_config.process_buffer_size,
        Box::new(timestamp_synch.clone()),
        true,
    );

    // Node that authorizes, debounces and records
    let mut access_gate_node = Node::create_common(
        "access_gate".to_string(),
        Box::new(AccessGate::new(controller)),
        graph_config.block_channel_full,
        graph_config.channel_buffer_size,
        graph_config.process_buffer_size,
        Box::new(timestamp_synch.clone()),
        true,
    );

    // Node that draws the admissions on top of the original frame
    let bbox_render_node = TerminalNode::create_common(
        "bbox_render".to_string(),
        Box::new(renderer(config)?),
        false,
        RENDER_BUFFER,
        1,
        Box::new(timestamp_synch.clone()),
        true,
    );

    // Frame -> Plate detector
    link(
        video_input_node.write_channel.writer.c1(),
        plate_detector_node.read_channel.channels.write().unwrap().c1(),
    )
    .map_err(link_error)?;

    // Frame -> OCR
    link(
        video_input_node.write_channel.writer.c1(),
        ocr_node.read_channel.channels.write().unwrap().c1(),
    )
    .map_err(link_error)?;

    // Plate detector -> OCR
    link(
        plate_detector_node.write_channel.writer.c1(),
        ocr_node.read_channel.channels.write().unwrap().c2(),
    )
    .map_err(link_error)?;

    // OCR -> Access gate
    link(
        ocr_node.write_channel.writer.c1(),
        access_gate_node.read_channel.channels.write().unwrap().c1(),
    )
    .map_err(link_error)?;

    // Access gate -> BoundingBox
    link(
        access_gate_node.write_channel.writer.c1(),
        bbox_render_node.read_channel.channels.write().unwrap().c1(),
    )
    .map_err(link_error)?;

    // Frame -> BoundingBox
    link(
        video_input_node.write_channel.writer.c1(),
        bbox_render_node.read_channel.channels.write().unwrap().c2(),
    )
    .map_err(link_error)?;

    let mut graph = Graph::new(Metrics::no_metrics());

    graph.start_terminal_node(bbox_render_node);
    graph.start_node(access_gate_node);
    graph.start_node(ocr_node);
    graph.start_node(plate_detector_node);
    graph.start_source_node(video_input_node);

    Ok((graph, done_channel))
}

fn main() -> Result<()> {
    setup::init_tracing();
    let args = Args::parse();

    let config = setup::load_config_with(&args.config, |config| apply_overrides(config, &args))?;

    let profiler = Profiler::start(&config.profiling)?;
    let (mut graph, done_channel) = setup_graph(&config)?;

    match config.graph.run_for_secs {
        Some(secs) => {
            info!("Running for {}s", secs);
            // Either the stream ends or time runs out
            let _ = done_channel.recv_timeout(Duration::from_secs(secs));
        }
        None => {
            info!("Waiting for the stream to end");
            let _ = done_channel.recv();
        }
    }
    graph.stop(true, None);
    info!("Graph stopped");

    setup::write_metrics(&config.output)?;
    if let Some(profiler) = profiler {
        profiler.stop()?;
    }
    Ok(())
}
