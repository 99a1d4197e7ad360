use clap::Parser;
use clap::Subcommand;

#[derive(Clone, Parser)]
#[clap(
    name = "igtp-rs",
    about = "Image Guided Tracking Pipeline",
    version,
    author
)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clone, Subcommand)]
pub enum Command {
    /// Track simulated tools on the virtual device
    VirtualTrack {
        /// Number of simulated tools
        #[clap(short = 't', long = "tools", default_value = "2")]
        tools: usize,

        /// Tracking duration in seconds
        #[clap(short = 'd', long = "duration", default_value = "5")]
        duration: u64,
    },

    /// Stream tool poses from an OpenIGTLink server
    IgtlTrack {
        /// Server host
        #[clap(long = "host", default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[clap(short = 'p', long = "port", default_value = "18944")]
        port: i32,

        /// Tracking duration in seconds
        #[clap(short = 'd', long = "duration", default_value = "10")]
        duration: u64,
    },

    /// Detect which tools an OpenIGTLink server streams
    IgtlAutodetect {
        /// Server host
        #[clap(long = "host", default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[clap(short = 'p', long = "port", default_value = "18944")]
        port: i32,

        /// Write the detected tool storage to this file
        #[clap(short = 'o', long = "output")]
        output: Option<String>,
    },

    /// Segment the foreground of an image around seed points
    Segment {
        /// Path to the input image
        #[clap(short = 'i', long = "input")]
        input: String,

        /// Output path for the mask image
        #[clap(short = 'o', long = "output")]
        output: String,

        /// Foreground seed point as 'x,y', can be given multiple times
        #[clap(short = 'f', long = "foreground")]
        foreground: Vec<String>,

        /// Background seed point as 'x,y', can be given multiple times
        #[clap(short = 'b', long = "background")]
        background: Vec<String>,

        /// Seed point dilation size in pixels
        #[clap(long = "dilation", default_value = "4")]
        dilation: u32,

        /// Only segment the seed region grown by this padding
        #[clap(long = "region-padding")]
        region_padding: Option<u32>,
    },
}

pub fn parse_args() -> Args {
    Args::parse()
}
