mod args;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use log::error;
use log::info;
use parking_lot::Mutex;

use igtp_rs::device::openigtlink::OpenIgtLinkTrackingDevice;
use igtp_rs::device::virtual_device::VirtualTrackingDevice;
use igtp_rs::device::SharedTrackingDevice;
use igtp_rs::device::TrackingDeviceType;
use igtp_rs::filters::grabcut::GrabCutImageFilter;
use igtp_rs::filters::ImageFilter;
use igtp_rs::filters::INVALID_IMAGE_ID;
use igtp_rs::logging;
use igtp_rs::navigation::storage::NavigationToolStorage;
use igtp_rs::navigation::tool::NavigationTool;
use igtp_rs::pipeline::configurator::TrackingDeviceSourceConfigurator;
use igtp_rs::pipeline::registry::TrackingSourceRegistry;
use igtp_rs::pipeline::source::TrackingDeviceSource;

const UPDATE_PERIOD: Duration = Duration::from_millis(200);
const SEGMENTATION_DEADLINE: Duration = Duration::from_secs(60);

fn main() {
    let args = args::parse_args();

    logging::setup_logging();

    match args.command {
        args::Command::VirtualTrack { tools, duration } => run_virtual_track(tools, duration),
        args::Command::IgtlTrack {
            host,
            port,
            duration,
        } => run_igtl_track(&host, port, duration),
        args::Command::IgtlAutodetect { host, port, output } => {
            run_igtl_autodetect(&host, port, output.as_deref())
        }
        args::Command::Segment {
            input,
            output,
            foreground,
            background,
            dilation,
            region_padding,
        } => run_segment(
            &input,
            &output,
            &foreground,
            &background,
            dilation,
            region_padding,
        ),
    }
}

fn run_virtual_track(tools: usize, duration: u64) {
    let mut storage = NavigationToolStorage::new();
    for index in 0..tools {
        let tool = NavigationTool::new(
            &format!("virtual-{index}"),
            &format!("VirtualTool-{index}"),
            TrackingDeviceType::Virtual,
        );
        if let Err(e) = storage.add_tool(tool) {
            error!("could not populate the tool storage: {e}");
            return;
        }
    }

    let device = Arc::new(Mutex::new(VirtualTrackingDevice::new())) as SharedTrackingDevice;
    let registry = Arc::new(TrackingSourceRegistry::with_defaults());
    let mut configurator = TrackingDeviceSourceConfigurator::new(storage, device, registry);
    let Some(mut source) = configurator.create_tracking_device_source() else {
        error!(
            "could not create the tracking source: {}",
            configurator.error_message()
        );
        return;
    };

    if let Err(e) = source.connect() {
        error!("could not connect the virtual device: {e}");
        return;
    }
    if let Err(e) = source.start_tracking() {
        error!("could not start tracking: {e}");
        return;
    }

    run_update_loop(&mut source, duration);

    if let Err(e) = source.stop_tracking() {
        error!("could not stop tracking: {e}");
    }
    if let Err(e) = source.disconnect() {
        error!("could not close the connection: {e}");
    }
}

fn run_igtl_track(host: &str, port: i32, duration: u64) {
    let Ok(mut device) = OpenIgtLinkTrackingDevice::new(host, port) else {
        error!("could not create the tracking device");
        return;
    };

    let storage = device.auto_detect_tools();
    if storage.is_empty() {
        error!("no tools detected on {host}:{port}");
        return;
    }
    for tool in storage.iter() {
        info!("detected tool '{}'", tool.name);
    }

    let device = Arc::new(Mutex::new(device)) as SharedTrackingDevice;
    let registry = Arc::new(TrackingSourceRegistry::with_defaults());
    let mut configurator = TrackingDeviceSourceConfigurator::new(storage, device, registry);
    let Some(mut source) = configurator.create_tracking_device_source() else {
        error!(
            "could not create the tracking source: {}",
            configurator.error_message()
        );
        return;
    };

    if let Err(e) = source.connect() {
        error!("could not connect to {host}:{port}: {e}");
        return;
    }
    if let Err(e) = source.start_tracking() {
        error!("could not start tracking: {e}");
        return;
    }

    run_update_loop(&mut source, duration);

    if let Err(e) = source.stop_tracking() {
        error!("could not stop tracking: {e}");
    }
    if let Err(e) = source.disconnect() {
        error!("could not close the connection: {e}");
    }
}

fn run_update_loop(source: &mut TrackingDeviceSource, duration: u64) {
    let deadline = Instant::now() + Duration::from_secs(duration);
    while Instant::now() < deadline {
        thread::sleep(UPDATE_PERIOD);
        source.update();
        for index in 0..source.output_count() {
            let Some(data) = source.output(index) else {
                continue;
            };
            if !data.data_valid {
                continue;
            }
            info!(
                "{}: position ({:.1}, {:.1}, {:.1})",
                data.name, data.position.x, data.position.y, data.position.z
            );
        }
    }
}

fn run_igtl_autodetect(host: &str, port: i32, output: Option<&str>) {
    let Ok(mut device) = OpenIgtLinkTrackingDevice::new(host, port) else {
        error!("could not create the tracking device");
        return;
    };

    let storage = device.auto_detect_tools();
    if storage.is_empty() {
        info!("no tools detected on {host}:{port}");
        return;
    }
    for tool in storage.iter() {
        info!("detected tool '{}' as {}", tool.name, tool.identifier);
    }

    if let Some(path) = output {
        if let Err(e) = storage.save(Path::new(path)) {
            error!("could not save the tool storage: {e}");
        }
    }
}

fn run_segment(
    input: &str,
    output: &str,
    foreground: &[String],
    background: &[String],
    dilation: u32,
    region_padding: Option<u32>,
) {
    let Ok(mut image) = image::open(input) else {
        error!("could not open image {input}");
        return;
    };

    let Some(foreground) = parse_points(foreground) else {
        error!("foreground seed points must be given as 'x,y'");
        return;
    };
    let Some(background) = parse_points(background) else {
        error!("background seed points must be given as 'x,y'");
        return;
    };
    if foreground.is_empty() {
        error!("at least one foreground seed point is needed");
        return;
    }

    let mut filter = GrabCutImageFilter::new();
    filter.set_model_points_dilation_size(dilation);
    if let Some(padding) = region_padding {
        filter.set_use_only_region_around_model_points(padding);
    }
    filter.set_model_points_with_background(foreground, background);

    if !filter.filter_image(&mut image, 1) {
        error!("could not submit the image for segmentation");
        return;
    }

    let deadline = Instant::now() + SEGMENTATION_DEADLINE;
    while filter.result_image_id() == INVALID_IMAGE_ID {
        if Instant::now() >= deadline {
            error!("segmentation did not finish in time");
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }

    let Some(mask) = filter.result_mask() else {
        error!("segmentation finished without a result mask");
        return;
    };
    let foreground_pixels = mask.pixels().filter(|pixel| pixel[0] != 0).count();
    info!("{foreground_pixels} foreground pixels found");

    if let Err(e) = mask.save(output) {
        error!("could not save the mask to {output}: {e}");
        return;
    }
    info!("mask written to {output}");
}

fn parse_points(arguments: &[String]) -> Option<Vec<(u32, u32)>> {
    arguments
        .iter()
        .map(|argument| parse_point(argument))
        .collect()
}

fn parse_point(argument: &str) -> Option<(u32, u32)> {
    let (x, y) = argument.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}
