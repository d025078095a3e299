#![warn(clippy::unwrap_used)]

use clap::Parser;
use std::path::{Path, PathBuf};

use docstamp::{
    assets::AssetConfiguration,
    compositor::{
        decode_image, export_composite, ExportSettings, LayerSettings, OverlayLayer,
        PlacementContainer,
    },
    document::{generate_batch, save_batch, DocumentRequest},
    error::ContextError,
    metadata::{set_raster_dpi, RasterFormat},
};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct CliArguments {
    #[command(subcommand)]
    command: Command,
    /// Log everything down to the drawing of single fields.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Generate one or several PDF documents from a JSON request file.
    Generate {
        #[arg(short = 'r', long = "request", value_name = "json_file")]
        request_path: PathBuf,
        /// Asset configuration, the default layout under `public/` is used without it.
        #[arg(short = 'a', long = "assets", value_name = "json_file")]
        asset_configuration_path: Option<PathBuf>,
        #[arg(short = 'o', long = "output", value_name = "directory")]
        output_directory: PathBuf,
    },
    /// Record the print resolution of a PNG or JPEG file.
    SetDpi {
        #[arg(short = 'i', long = "input", value_name = "image_file")]
        input_path: PathBuf,
        #[arg(short = 'd', long = "dpi", default_value_t = 300)]
        dpi: u32,
        #[arg(short = 'o', long = "output", value_name = "image_file")]
        output_path: PathBuf,
    },
    /// Composite overlay layers over a base image and export the result.
    Composite {
        #[arg(short = 'b', long = "base", value_name = "image_file")]
        base_path: Option<PathBuf>,
        #[arg(short = 'l', long = "layers", value_name = "json_file")]
        layers_path: PathBuf,
        #[arg(long = "width")]
        width: u32,
        #[arg(long = "height")]
        height: u32,
        #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Png)]
        format: OutputFormat,
        #[arg(short = 'q', long = "quality", default_value_t = 92)]
        quality: u8,
        #[arg(short = 'd', long = "dpi", default_value_t = 300)]
        dpi: u32,
        #[arg(short = 'o', long = "output", value_name = "image_file")]
        output_path: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, clap::ValueEnum)]
enum OutputFormat {
    Png,
    Jpeg,
}

impl From<OutputFormat> for RasterFormat {
    fn from(output_format: OutputFormat) -> Self {
        match output_format {
            OutputFormat::Png => RasterFormat::Png,
            OutputFormat::Jpeg => RasterFormat::Jpeg,
        }
    }
}

/// The layers file of the `composite` command.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CompositionFile {
    #[serde(default)]
    container: PlacementContainer,
    layers: Vec<LayerFile>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LayerFile {
    /// Relative to the layers file.
    image_path: PathBuf,
    #[serde(default)]
    settings: LayerSettings,
}

fn main() {
    if let Err(error) = fallible_main() {
        log::error!("{}", error);
        std::process::exit(1);
    }
}

fn fallible_main() -> Result<(), ContextError> {
    let arguments = CliArguments::parse();
    env_logger::builder()
        .filter_level(if arguments.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();
    log::debug!("{:?}", arguments);

    match arguments.command {
        Command::Generate {
            request_path,
            asset_configuration_path,
            output_directory,
        } => {
            let asset_configuration = match asset_configuration_path {
                Some(path) => AssetConfiguration::from_path(&path)?,
                None => AssetConfiguration::default(),
            };
            let requests = DocumentRequest::from_path(&request_path)?;
            let batch_report = generate_batch(
                &requests,
                &asset_configuration.file_system_assets(),
                &asset_configuration,
            );
            save_batch(
                &batch_report.documents,
                &output_directory,
                asset_configuration.save_interval(),
            )?;
            for (request_index, error) in &batch_report.failures {
                log::error!("Request {}: {}", request_index, error);
            }
            if batch_report.failure_count() > 0 {
                return Err(ContextError::with_context(format!(
                    "{} of {} documents failed",
                    batch_report.failure_count(),
                    requests.len()
                )));
            }
        }
        Command::SetDpi {
            input_path,
            dpi,
            output_path,
        } => {
            let input_bytes = read_file(&input_path)?;
            let format = match image::guess_format(&input_bytes) {
                Ok(image::ImageFormat::Png) => RasterFormat::Png,
                Ok(image::ImageFormat::Jpeg) => RasterFormat::Jpeg,
                _ => {
                    return Err(ContextError::with_context(format!(
                        "The file {:?} is neither a PNG nor a JPEG image",
                        input_path
                    )))
                }
            };
            write_file(&output_path, &set_raster_dpi(&input_bytes, dpi, format))?;
        }
        Command::Composite {
            base_path,
            layers_path,
            width,
            height,
            format,
            quality,
            dpi,
            output_path,
        } => {
            let base = base_path
                .map(|base_path| read_file(&base_path).and_then(|bytes| decode_image(&bytes)))
                .transpose()?;
            let composition_content = std::fs::read_to_string(&layers_path).map_err(|error| {
                ContextError::with_error(format!("Unable to read {:?}", layers_path), &error)
            })?;
            let composition: CompositionFile = serde_json::from_str(&composition_content)
                .map_err(|error| {
                    ContextError::with_error(format!("Unable to parse {:?}", layers_path), &error)
                })?;

            let layers_directory = layers_path.parent().map(PathBuf::from).unwrap_or_default();
            let layers = composition
                .layers
                .iter()
                .map(|layer_file| {
                    let image_bytes = read_file(&layers_directory.join(&layer_file.image_path))?;
                    Ok(OverlayLayer::new(
                        decode_image(&image_bytes)?,
                        layer_file.settings,
                    ))
                })
                .collect::<Result<Vec<_>, ContextError>>()?;

            let encoded_bytes = export_composite(
                base.as_ref(),
                &layers,
                composition.container,
                &ExportSettings {
                    width,
                    height,
                    format: format.into(),
                    quality,
                    dpi,
                },
            )?;
            write_file(&output_path, &encoded_bytes)?;
        }
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, ContextError> {
    std::fs::read(path)
        .map_err(|error| ContextError::with_error(format!("Unable to read {:?}", path), &error))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ContextError> {
    std::fs::write(path, bytes)
        .map_err(|error| ContextError::with_error(format!("Unable to write {:?}", path), &error))?;
    log::info!("Saved the output file to the path: {:?}", path);
    Ok(())
}
