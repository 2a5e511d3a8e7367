use clap::{App, Arg, ArgMatches};
use failure::{format_err, Error};
use image::pnm::PNMEncoder;
use image::pnm::{PNMSubtype, SampleEncoding};
use image::ColorType;
use mandelpool::{config, kernel, ExecutionKind, Orchestrator, PoolConfig};
use num::Complex;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn parse_pair<T>(s: &str, separator: char) -> Option<(T, T)>
where
    T: FromStr,
{
    match s.find(separator) {
        None => None,
        Some(index) => match (T::from_str(&s[..index]), T::from_str(&s[index + 1..])) {
            (Ok(l), Ok(r)) => Some((l, r)),
            _ => None,
        },
    }
}

fn parse_complex(s: &str) -> Option<Complex<f64>> {
    match parse_pair(s, ',') {
        Some((re, im)) => Some(Complex { re, im }),
        None => None,
    }
}

fn validate_pair<T: FromStr>(s: &str, separator: char, err: &str) -> Result<(), String> {
    match parse_pair::<T>(s, separator) {
        Some(_) => Ok(()),
        None => Err(err.to_string()),
    }
}

fn validate_range<T: FromStr + PartialOrd>(
    s: &str,
    low: T,
    high: T,
    isnotanumber_err: &str,
    isnotinrange_err: &str,
) -> Result<(), String> {
    match T::from_str(s) {
        Ok(i) => {
            if i >= low && i <= high {
                Ok(())
            } else {
                Err(isnotinrange_err.to_string())
            }
        }
        Err(_) => Err(isnotanumber_err.to_string()),
    }
}

const OUTPUT: &str = "output";
const SIZE: &str = "size";
const WORKERS: &str = "workers";
const ITERATIONS: &str = "iterations";
const CENTER: &str = "center";
const ZOOM: &str = "zoom";
const KIND: &str = "kind";
const FRAMES: &str = "frames";
const ZOOM_STEP: &str = "zoom-step";
const SWITCH_EVERY: &str = "switch-every";

/// Give up on a run that produces no frame for this long.
const STALL_LIMIT: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_millis(1);

fn args<'a>() -> ArgMatches<'a> {
    let max_workers = 4 * num_cpus::get();

    App::new("mandel")
        .version("0.1.0")
        .author("Elf M. Sternberg <elf.sternberg@gmail.com>")
        .about("Renders Mandelbrot frames with a pool of process or thread workers")
        .arg(
            Arg::with_name(OUTPUT)
                .required(true)
                .long(OUTPUT)
                .short("o")
                .takes_value(true)
                .help("Output file (PPM) for the last frame"),
        )
        .arg(
            Arg::with_name(SIZE)
                .required(false)
                .long(SIZE)
                .short("s")
                .takes_value(true)
                .default_value("800x600")
                .validator(|s| validate_pair::<u16>(&s, 'x', "Could not parse output image size"))
                .help("Size of output image"),
        )
        .arg(
            Arg::with_name(WORKERS)
                .required(false)
                .long(WORKERS)
                .short("w")
                .takes_value(true)
                .validator(move |s| {
                    validate_range(
                        &s,
                        1,
                        max_workers,
                        "Could not parse worker count",
                        &format!("Worker count must be between 1 and {}", max_workers),
                    )
                })
                .help("Number of workers per generation [default: half the cores, plus one]"),
        )
        .arg(
            Arg::with_name(ITERATIONS)
                .required(false)
                .long(ITERATIONS)
                .short("i")
                .takes_value(true)
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        100_000,
                        "Could not parse iteration count",
                        "Iteration count must be between 1 and 100000",
                    )
                })
                .help("Iteration budget of the first frame [default: 80]"),
        )
        .arg(
            Arg::with_name(CENTER)
                .required(false)
                .long(CENTER)
                .short("c")
                .takes_value(true)
                .allow_hyphen_values(true)
                .default_value("-0.5,0")
                .validator(|s| validate_pair::<f64>(&s, ',', "Could not parse center point"))
                .help("Center of the view on the complex plane"),
        )
        .arg(
            Arg::with_name(ZOOM)
                .required(false)
                .long(ZOOM)
                .short("z")
                .takes_value(true)
                .default_value("1.5")
                .validator(|s| {
                    validate_range(
                        &s,
                        1e-15,
                        2.0,
                        "Could not parse zoom",
                        "Zoom must be between 1e-15 and 2",
                    )
                })
                .help("Half the height of the view"),
        )
        .arg(
            Arg::with_name(KIND)
                .required(false)
                .long(KIND)
                .short("k")
                .takes_value(true)
                .possible_values(&["process", "thread"])
                .default_value("process")
                .help("Kind of the first worker generation"),
        )
        .arg(
            Arg::with_name(FRAMES)
                .required(false)
                .long(FRAMES)
                .short("n")
                .takes_value(true)
                .default_value("1")
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        100_000,
                        "Could not parse frame count",
                        "Frame count must be between 1 and 100000",
                    )
                })
                .help("Number of frames to compute"),
        )
        .arg(
            Arg::with_name(ZOOM_STEP)
                .required(false)
                .long(ZOOM_STEP)
                .takes_value(true)
                .default_value("0")
                .validator(|s| {
                    validate_range(
                        &s,
                        0.0,
                        1000.0,
                        "Could not parse zoom step",
                        "Zoom step must be between 0 and 1000",
                    )
                })
                .help("Zoom steps taken after every frame"),
        )
        .arg(
            Arg::with_name(SWITCH_EVERY)
                .required(false)
                .long(SWITCH_EVERY)
                .takes_value(true)
                .default_value("0")
                .validator(|s| {
                    validate_range(
                        &s,
                        0,
                        100_000,
                        "Could not parse switch interval",
                        "Switch interval must be between 0 and 100000",
                    )
                })
                .help("Switch between process and thread workers every N frames (0: never)"),
        )
        .get_matches()
}

fn write_image(outfile: &str, pixels: &[u8], bounds: (usize, usize)) -> Result<(), std::io::Error> {
    let path = Path::new(outfile);
    let output = File::create(&path)?;
    let mut encoder =
        PNMEncoder::new(output).with_subtype(PNMSubtype::Pixmap(SampleEncoding::Binary));
    encoder.encode(pixels, bounds.0 as u32, bounds.1 as u32, ColorType::RGB(8))?;
    Ok(())
}

fn value<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T, Error> {
    matches
        .value_of(name)
        .and_then(|s| T::from_str(s).ok())
        .ok_or_else(|| format_err!("Could not parse --{}", name))
}

fn value_or<T: FromStr>(matches: &ArgMatches, name: &str, default: T) -> Result<T, Error> {
    match matches.value_of(name) {
        None => Ok(default),
        Some(_) => value(matches, name),
    }
}

fn run(matches: &ArgMatches) -> Result<(), Error> {
    let (width, height) = matches
        .value_of(SIZE)
        .and_then(|s| parse_pair::<u16>(s, 'x'))
        .ok_or_else(|| format_err!("Error parsing image dimensions"))?;
    let center = matches
        .value_of(CENTER)
        .and_then(parse_complex)
        .ok_or_else(|| format_err!("Error parsing center point"))?;
    let kind: ExecutionKind = value(matches, KIND)?;
    let frames: u64 = value(matches, FRAMES)?;
    let zoom_step: f64 = value(matches, ZOOM_STEP)?;
    let switch_every: u64 = value(matches, SWITCH_EVERY)?;

    let config = PoolConfig {
        workers: value_or(matches, WORKERS, config::default_workers())?,
        kind,
        max_iters: value_or(matches, ITERATIONS, config::DEFAULT_MAX_ITERS)?,
        ..PoolConfig::new(width as usize, height as usize)
    };
    let mut viz = Orchestrator::new(config, kernel::mandelbrot())?;
    {
        let controls = viz.controls_mut();
        controls.center_x = center.re;
        controls.center_y = center.im;
        controls.zoom = value(matches, ZOOM)?;
    }

    let mut seen = 0;
    let mut last_frame = Instant::now();
    let mut pixels = Vec::new();
    while seen < frames {
        viz.update()?;
        let mut fresh = false;
        if let Some(frame) = viz.get_frame() {
            if !frame.is_placeholder() {
                fresh = true;
                seen += 1;
                debug!("frame {} of {}", seen, frames);
                if seen == frames {
                    pixels = frame.to_rgb8();
                }
            }
        }

        if fresh {
            last_frame = Instant::now();
            let controls = viz.controls_mut();
            if zoom_step > 0.0 {
                controls.zoom_in(zoom_step);
            }
            if switch_every > 0 && seen % switch_every == 0 && seen < frames {
                controls.switch_kind();
                info!("switching to {} workers", controls.kind);
            }
        } else if last_frame.elapsed() > STALL_LIMIT {
            viz.shutdown(SHUTDOWN_TIMEOUT);
            return Err(format_err!("No frame within {:?}", STALL_LIMIT));
        }

        if viz.status().stalled {
            warn!("worker pool stalled; restarting it");
            viz.restart();
        }
        sleep(TICK);
    }

    if !viz.shutdown(SHUTDOWN_TIMEOUT) {
        warn!("workers had to be killed");
    }
    let outfile = matches
        .value_of(OUTPUT)
        .ok_or_else(|| format_err!("No output file"))?;
    write_image(outfile, &pixels, (width as usize, height as usize))?;
    info!("wrote {}", outfile);
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let matches = args();
    if let Err(e) = run(&matches) {
        eprintln!("Render failure: {}", e);
        std::process::exit(1);
    }
}
