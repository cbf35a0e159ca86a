//! Apply command - converge the manifest against the chosen target

use anyhow::{Context as _, Result};
use colored::Colorize;
use std::fs;
use std::path::Path;

use converge::TargetKind;

use crate::Context;
use crate::cli::{ApplyArgs, OutputFormat};
use crate::ui;

use super::plan::print_plan;
use super::{build_context, execute, finish, print_report};

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let kind: TargetKind = args.run.target.into();

    // Only the API target mutates anything, so only it needs a confirmation
    if kind == TargetKind::Api && !args.yes {
        let preview = build_context(&args.run, true, &ctx.cancel)?;
        let plan = execute(&preview, ctx.quiet)?;
        print_plan(&plan);

        if plan.changes().count() == 0 || !plan.is_success() {
            return finish(&plan);
        }
        println!();
        if !confirm_proceed()? {
            println!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    let engine = build_context(&args.run, false, &ctx.cancel)?;
    let report = execute(&engine, ctx.quiet)?;

    match kind {
        TargetKind::Api => {
            // Whatever did get applied is real, so persist it before reporting failures
            engine.cloud().save(&args.run.state)?;
            log::info!("saved state to {}", args.run.state.display());
            if !ctx.quiet {
                print_report(&report);
            }
        }
        TargetKind::Terraform => {
            if let Some(tf) = engine.target().as_terraform() {
                let output = tf.finish();
                let text = match args.format {
                    OutputFormat::Json => output.to_json_string()?,
                    OutputFormat::Hcl => output.to_hcl(),
                };
                emit(&text, args.out.as_deref())?;
            }
        }
        TargetKind::CloudFormation => {
            if let Some(cfn) = engine.target().as_cloudformation() {
                emit(&cfn.finish().to_json_string()?, args.out.as_deref())?;
            }
        }
    }

    finish(&report)
}

/// Write rendered output to a file, or stdout
fn emit(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            ui::success(&format!("Wrote {}", path.display()));
        }
        None => println!("{text}"),
    }
    Ok(())
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Apply these changes?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{RunArgs, TargetArg};
    use cloudtasks::SimCloud;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
[[route_table]]
name = "main"
vpc_id = "vpc-1"

[[server_group]]
name = "web"
policies = ["anti-affinity"]
"#;

    fn apply_args(dir: &TempDir, target: TargetArg, out: Option<&str>) -> ApplyArgs {
        let manifest = dir.path().join("cloudup.toml");
        fs::write(&manifest, MANIFEST).unwrap();
        ApplyArgs {
            run: RunArgs {
                manifest,
                state: dir.path().join("state/state.json"),
                target,
                jobs: None,
                lifecycle: Vec::new(),
            },
            out: out.map(|name| dir.path().join(name)),
            format: OutputFormat::Json,
            yes: true,
        }
    }

    fn quiet() -> Context {
        Context {
            verbose: 0,
            quiet: true,
            cancel: converge::CancelToken::new(),
        }
    }

    #[test]
    fn test_api_apply_saves_state() {
        let dir = TempDir::new().unwrap();
        let args = apply_args(&dir, TargetArg::Api, None);
        run(&quiet(), &args).unwrap();

        let cloud = SimCloud::load(&args.run.state).unwrap();
        let state = cloud.snapshot();
        assert_eq!(state.route_tables.len(), 1);
        assert_eq!(state.server_groups.len(), 1);
    }

    #[test]
    fn test_terraform_apply_writes_file() {
        let dir = TempDir::new().unwrap();
        let mut args = apply_args(&dir, TargetArg::Terraform, Some("out/main.tf.json"));
        run(&quiet(), &args).unwrap();

        let text = fs::read_to_string(dir.path().join("out/main.tf.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["resource"]["aws_route_table"]["main"]["vpc_id"], "vpc-1");
        assert!(json["resource"]["openstack_compute_servergroup_v2"]["web"].is_object());
        assert!(!args.run.state.exists());

        args.format = OutputFormat::Hcl;
        args.out = Some(dir.path().join("main.tf"));
        run(&quiet(), &args).unwrap();
        let hcl = fs::read_to_string(dir.path().join("main.tf")).unwrap();
        assert!(hcl.contains("resource \"aws_route_table\" \"main\""));
    }

    #[test]
    fn test_cloudformation_rejects_unsupported_task() {
        let dir = TempDir::new().unwrap();
        let args = apply_args(&dir, TargetArg::CloudFormation, Some("template.json"));
        assert!(run(&quiet(), &args).is_err());
        assert!(!dir.path().join("template.json").exists());
    }
}
