//! CLI subcommand handlers.

use crate::Commands;
use crate::SettingsAction;
use anyhow::Context;
use serde_yaml::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tunecfg_core::error::PathError;
use tunecfg_core::interpolate;
use tunecfg_core::loader::{self, LoadOptions};
use tunecfg_core::plan::{self, PlanInputs};
use tunecfg_core::settings::{self, OutputFormat, TunecfgSettings};
use tunecfg_core::tree::{self, KeyPath};
use tunecfg_core::validate::{self, ValidationOptions};
use tunecfg_core::{RecipeKind, TuneError, catalog};

/// Handle a CLI subcommand, writing to stdout.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    settings: &TunecfgSettings,
) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(command, workspace, settings, &mut out)
}

/// Run a subcommand against any writer.
pub(crate) fn execute(
    command: Commands,
    workspace: &Path,
    settings: &TunecfgSettings,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Commands::Show {
            config,
            overrides,
            format,
            flat,
            raw,
        } => {
            let format = format.unwrap_or(settings.output_format);
            handle_show(&config, &overrides, format, flat, raw, settings, out)
        }
        Commands::Get {
            config,
            key,
            overrides,
        } => handle_get(&config, &key, &overrides, settings, out),
        Commands::Validate {
            config,
            overrides,
            kind,
            strict,
        } => {
            let options = ValidationOptions {
                kind: kind.or(settings.default_kind),
                strict: strict || settings.strict,
                interpolation: settings.interpolation(),
            };
            handle_validate(&config, &overrides, &options, out)
        }
        Commands::Plan {
            config,
            overrides,
            dataset_size,
            steps_run,
        } => {
            let inputs = PlanInputs {
                dataset_size,
                steps_run,
            };
            handle_plan(&config, &overrides, inputs, settings, out)
        }
        Commands::Components { config, overrides } => {
            handle_components(&config, &overrides, settings, out)
        }
        Commands::Diff { left, right } => handle_diff(&left, &right, settings, out),
        Commands::Ls { dirs } => {
            let dirs = if dirs.is_empty() {
                settings.resolved_recipe_dirs(workspace)
            } else {
                dirs
            };
            handle_ls(&dirs, out)
        }
        Commands::Cp { src, dest, force } => {
            let src = locate_recipe(&src, &settings.resolved_recipe_dirs(workspace))?;
            let written = catalog::copy_recipe(&src, &dest, force)?;
            writeln!(out, "Copied {} to {}", src.display(), written.display())?;
            Ok(())
        }
        Commands::Settings { action } => handle_settings(action, workspace, settings, out),
    }
}

fn load_options(settings: &TunecfgSettings) -> LoadOptions {
    LoadOptions {
        kind: settings.default_kind,
        interpolation: settings.interpolation(),
    }
}

/// Overrides applied and, unless `raw`, interpolations resolved.
fn load_tree(
    config: &Path,
    overrides: &[String],
    raw: bool,
    settings: &TunecfgSettings,
) -> anyhow::Result<Value> {
    let tree = loader::load_raw(config, overrides)
        .with_context(|| format!("Failed to load {}", config.display()))?;
    if raw {
        return Ok(tree);
    }
    let resolved = interpolate::resolve(&tree, &settings.interpolation())
        .map_err(TuneError::from)
        .with_context(|| format!("Failed to resolve {}", config.display()))?;
    Ok(resolved)
}

fn render(value: &Value, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Json => serde_json::to_string_pretty(value)? + "\n",
    })
}

fn handle_show(
    config: &Path,
    overrides: &[String],
    format: OutputFormat,
    flat: bool,
    raw: bool,
    settings: &TunecfgSettings,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let tree = load_tree(config, overrides, raw, settings)?;
    if flat {
        for (key, value) in tree::flatten(&tree) {
            let shown = match tree::render_scalar(&value) {
                Some(text) => text,
                None => serde_json::to_string(&value)?,
            };
            writeln!(out, "{}: {}", key, shown)?;
        }
        return Ok(());
    }
    let tree = if raw {
        tree
    } else {
        interpolate::escape_literals(&tree)
    };
    write!(out, "{}", render(&tree, format)?)?;
    Ok(())
}

fn handle_get(
    config: &Path,
    key: &str,
    overrides: &[String],
    settings: &TunecfgSettings,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let tree = load_tree(config, overrides, false, settings)?;
    let path = KeyPath::parse(key).map_err(TuneError::from)?;
    let value = tree::select(&tree, &path).ok_or_else(|| {
        TuneError::from(PathError::NotFound {
            path: path.to_string(),
        })
    })?;
    match tree::render_scalar(value) {
        Some(text) => writeln!(out, "{}", text)?,
        None => write!(out, "{}", render(value, settings.output_format)?)?,
    }
    Ok(())
}

fn handle_validate(
    config: &Path,
    overrides: &[String],
    options: &ValidationOptions,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let tree = loader::load_raw(config, overrides)
        .with_context(|| format!("Failed to load {}", config.display()))?;
    let report = validate::validate_tree(&tree, options);

    for diagnostic in &report.diagnostics {
        writeln!(out, "{}", diagnostic)?;
    }
    let kind = report.kind.map(|k| k.to_string()).unwrap_or_default();
    writeln!(
        out,
        "{}: {} error(s), {} warning(s) [{}]",
        config.display(),
        report.error_count(),
        report.warnings().count(),
        kind
    )?;
    report.into_result()?;
    Ok(())
}

fn handle_plan(
    config: &Path,
    overrides: &[String],
    inputs: PlanInputs,
    settings: &TunecfgSettings,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let recipe = loader::load_recipe(config, overrides, &load_options(settings))
        .with_context(|| format!("Failed to load {}", config.display()))?;
    let plan = plan::derive(&recipe.config, recipe.kind, inputs).map_err(TuneError::from)?;
    for warning in &plan.warnings {
        tracing::warn!("{}", warning);
    }
    let value = serde_yaml::to_value(&plan)?;
    write!(out, "{}", render(&value, settings.output_format)?)?;
    Ok(())
}

fn handle_components(
    config: &Path,
    overrides: &[String],
    settings: &TunecfgSettings,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let recipe = loader::load_recipe(config, overrides, &load_options(settings))
        .with_context(|| format!("Failed to load {}", config.display()))?;
    let sites = tunecfg_core::collect_components(&recipe.resolved);
    let width = sites.iter().map(|s| s.key.len()).max().unwrap_or(0);
    for site in &sites {
        writeln!(out, "{:width$}  {}", site.key, site.component, width = width)?;
    }

    for (key, checkpointer) in recipe.config.checkpointers().map_err(TuneError::from)? {
        let files = checkpointer.file_paths(key).map_err(TuneError::from)?;
        if files.is_empty() {
            continue;
        }
        writeln!(out, "\n{} files:", key)?;
        for file in files {
            writeln!(out, "  {}", file.display())?;
        }
    }
    Ok(())
}

fn handle_diff(
    left: &Path,
    right: &Path,
    settings: &TunecfgSettings,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let left_tree = load_tree(left, &[], false, settings)?;
    let right_tree = load_tree(right, &[], false, settings)?;
    let diff = tunecfg_core::diff(&left_tree, &right_tree);
    if diff.is_empty() {
        writeln!(out, "No differences")?;
    } else {
        writeln!(out, "{}", diff.render())?;
    }
    Ok(())
}

fn handle_ls(dirs: &[PathBuf], out: &mut impl Write) -> anyhow::Result<()> {
    let entries = catalog::discover(dirs);
    if entries.is_empty() {
        writeln!(out, "No recipe configs found.")?;
        return Ok(());
    }
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entry in &entries {
        match &entry.error {
            Some(error) => writeln!(out, "{:width$}  error: {}", entry.name, error, width = width)?,
            None => writeln!(
                out,
                "{:width$}  {:4}  {}",
                entry.name,
                entry.kind.as_ref().map(RecipeKind::as_str).unwrap_or("-"),
                entry.model.as_deref().unwrap_or("-"),
                width = width
            )?,
        }
    }
    Ok(())
}

/// A path to an existing file, or a catalog name such as `qwen2/0.5B_full`.
fn locate_recipe(src: &str, dirs: &[PathBuf]) -> anyhow::Result<PathBuf> {
    let as_path = PathBuf::from(src);
    if as_path.is_file() {
        return Ok(as_path);
    }
    let wanted = src.trim_end_matches(".yaml").trim_end_matches(".yml");
    catalog::discover(dirs)
        .into_iter()
        .find(|entry| entry.name == wanted)
        .map(|entry| entry.path)
        .ok_or_else(|| anyhow::anyhow!("No recipe file or catalog entry named '{}'", src))
}

fn handle_settings(
    action: SettingsAction,
    workspace: &Path,
    settings: &TunecfgSettings,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        SettingsAction::Show => {
            let toml_str = toml::to_string_pretty(settings)?;
            write!(out, "{}", toml_str)?;
            Ok(())
        }
        SettingsAction::Init => {
            let path = settings::workspace_settings_path(workspace);
            if path.exists() {
                writeln!(out, "Settings file already exists at: {}", path.display())?;
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml_str = toml::to_string_pretty(&TunecfgSettings::default())?;
            std::fs::write(&path, &toml_str)?;
            writeln!(out, "Created default settings at: {}", path.display())?;
            Ok(())
        }
    }
}
