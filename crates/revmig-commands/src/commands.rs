//! Command implementations
//!
//! Each command loads settings, opens what it needs (revision directory,
//! models file, database) and prints a short report. Errors are returned to
//! the binary, which prints them and exits non-zero.

use crate::cli::{Cli, Commands};
use anyhow::{Context, bail};
use console::style;
use dialoguer::Confirm;
use revmig_migrations::{
	AutoMigrationGenerator, Direction, ExecutionResult, FilesystemRepository, GenerateOptions,
	MigrationExecutor, MigrationPlan, MigrationRepository, MigrationSettings, ModelRegistry,
	ProgressEvent, ProgressStatus, RevisionGraph, SqlDialect, SqlStore, StateStore, Target,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Run the parsed command line
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
	let settings = cli.settings()?;
	match &cli.command {
		Commands::Generate { message, empty } => generate(&settings, message, *empty).await,
		Commands::Up { target, sql, from } => {
			if *sql {
				offline_sql(&settings, target, from.as_deref()).await
			} else {
				migrate(&settings, Direction::Up, target).await
			}
		}
		Commands::Down { target } => migrate(&settings, Direction::Down, target).await,
		Commands::Status => status(&settings).await,
		Commands::History => history(&settings).await,
		Commands::Heads => heads(&settings).await,
		Commands::Set { target, yes } => set(&settings, target, *yes).await,
	}
}

async fn load_graph(settings: &MigrationSettings) -> anyhow::Result<RevisionGraph> {
	let repository = FilesystemRepository::new(&settings.migrations_dir);
	repository.load_graph().await.with_context(|| {
		format!(
			"Failed to load revisions from {}",
			settings.migrations_dir.display()
		)
	})
}

async fn connect(settings: &MigrationSettings) -> anyhow::Result<SqlStore> {
	let url = settings.require_database_url()?;
	let store = SqlStore::connect(url)
		.await
		.context("Failed to connect to the database")?;
	Ok(store.with_lock_timeout(settings.lock_timeout()))
}

/// Token cancelled on Ctrl-C
fn interrupt_token() -> CancellationToken {
	let token = CancellationToken::new();
	let cancel = token.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("interrupted, rolling back the open revision");
			cancel.cancel();
		}
	});
	token
}

async fn generate(settings: &MigrationSettings, message: &str, empty: bool) -> anyhow::Result<()> {
	println!("{}", style("Checking for model changes...").cyan().bold());

	let models = ModelRegistry::from_file(&settings.models_file)?;
	let repository = Arc::new(tokio::sync::Mutex::new(FilesystemRepository::new(
		&settings.migrations_dir,
	)));
	let generator = AutoMigrationGenerator::new(Arc::new(models), repository);

	let options = GenerateOptions {
		allow_empty: empty,
		..Default::default()
	};
	let Some(revision) = generator.generate(message, &options).await? else {
		println!("{}", style("No changes detected").green());
		return Ok(());
	};

	println!(
		"{}",
		style(format!("Generated revision {}", revision.id))
			.green()
			.bold()
	);
	println!(
		"  {}",
		style(settings.migrations_dir.join(revision.file_name()).display()).dim()
	);
	for operation in &revision.up_ops {
		println!("  - {}", operation);
	}
	if revision.up_ops.iter().any(|op| op.is_destructive()) {
		println!(
			"{}",
			style("Warning: this revision drops or alters existing data. Renames are generated as a drop and a create; review it before applying.").yellow()
		);
	}
	Ok(())
}

async fn offline_sql(
	settings: &MigrationSettings,
	target: &str,
	from: Option<&str>,
) -> anyhow::Result<()> {
	let url = settings.require_database_url()?;
	let dialect = SqlDialect::from_url(url)
		.with_context(|| format!("Unrecognised database url: {}", url))?;
	let graph = load_graph(settings).await?;

	let marker = match from {
		Some(prefix) => vec![graph.resolve(prefix)?.id.clone()],
		None => Vec::new(),
	};
	let target: Target = target.parse()?;
	let plan = MigrationPlan::resolve(&graph, Direction::Up, &target, &marker)?;
	plan.preflight(&graph)?;
	for statement in plan.to_sql(dialect)? {
		if statement.starts_with("--") {
			println!("\n{}", statement);
		} else {
			println!("{};", statement);
		}
	}
	Ok(())
}

fn print_progress(event: &ProgressEvent) {
	match &event.status {
		ProgressStatus::Started => println!(
			"{} {} {} ({})",
			style("Running").cyan(),
			event.direction.name(),
			style(&event.revision).bold(),
			event.message
		),
		ProgressStatus::Applied => println!("  {}", style("OK").green()),
		ProgressStatus::Failed(reason) => println!("  {} {}", style("FAILED").red().bold(), reason),
	}
}

async fn migrate(settings: &MigrationSettings, direction: Direction, target: &str) -> anyhow::Result<()> {
	let target: Target = target.parse()?;
	let graph = load_graph(settings).await?;
	let store = connect(settings).await?;

	let (tx, mut rx) = mpsc::unbounded_channel();
	let printer = tokio::spawn(async move {
		while let Some(event) = rx.recv().await {
			print_progress(&event);
		}
	});

	let mut executor = MigrationExecutor::new(store, graph)
		.with_settings(settings)
		.with_cancellation(interrupt_token())
		.with_progress(tx);
	let result = match direction {
		Direction::Up => executor.up(&target).await,
		Direction::Down => executor.down(&target).await,
	};
	// Closes the progress channel
	drop(executor);
	printer.await?;

	report(result?);
	Ok(())
}

fn report(result: ExecutionResult) {
	let marker = result
		.marker
		.as_ref()
		.map_or_else(|| "none".to_string(), |id| id.to_string());
	if result.revisions.is_empty() {
		println!(
			"{}",
			style(format!("Nothing to do, database is at {}", marker)).green()
		);
	} else {
		println!(
			"{}",
			style(format!(
				"Ran {} revision(s), database is at {}",
				result.revisions.len(),
				marker
			))
			.green()
			.bold()
		);
	}
}

async fn status(settings: &MigrationSettings) -> anyhow::Result<()> {
	let graph = load_graph(settings).await?;
	let mut store = connect(settings).await?;
	let marker = store.read_marker().await?;
	let heads: Vec<_> = graph.heads().into_iter().map(|r| r.id.clone()).collect();

	match marker.as_slice() {
		[] => println!("Current revision: {}", style("none").dim()),
		[current] => {
			let note = if heads.contains(current) { " (head)" } else { "" };
			println!("Current revision: {}{}", style(current).bold(), note);
			if !graph.contains(current) {
				println!(
					"{}",
					style(format!(
						"Warning: revision {} is not in {}",
						current,
						settings.migrations_dir.display()
					))
					.yellow()
				);
			}
		}
		several => {
			println!(
				"{}",
				style("Warning: the database is stamped with several revisions").yellow()
			);
			for id in several {
				println!("  {}", id);
			}
		}
	}
	Ok(())
}

async fn history(settings: &MigrationSettings) -> anyhow::Result<()> {
	let graph = load_graph(settings).await?;
	let mut first = true;
	for revision in graph.history()? {
		let parent = revision
			.parent_id
			.as_ref()
			.map_or_else(|| "<base>".to_string(), |id| id.to_string());
		let head = if first { " (head)" } else { "" };
		println!(
			"{} -> {}{}, {}",
			parent,
			style(&revision.id).bold(),
			head,
			revision.message
		);
		first = false;
	}
	Ok(())
}

async fn heads(settings: &MigrationSettings) -> anyhow::Result<()> {
	let graph = load_graph(settings).await?;
	let heads = graph.heads();
	for head in &heads {
		println!("{} (head), {}", style(&head.id).bold(), head.message);
	}
	if heads.len() > 1 {
		println!(
			"{}",
			style("Warning: divergent branches; generate and up refuse to run until they are resolved").yellow()
		);
	}
	Ok(())
}

async fn set(settings: &MigrationSettings, target: &str, yes: bool) -> anyhow::Result<()> {
	let target: Target = target.parse()?;
	let graph = load_graph(settings).await?;

	let confirmed = yes
		|| Confirm::new()
			.with_prompt(format!(
				"Record {} as the current revision without running any migration?",
				target
			))
			.default(false)
			.interact()?;
	if !confirmed {
		bail!("Marker left unchanged");
	}

	let store = connect(settings).await?;
	let mut executor = MigrationExecutor::new(store, graph)
		.with_settings(settings)
		.with_cancellation(interrupt_token());
	let marker = executor.set(&target, true).await?;
	println!(
		"{}",
		style(format!(
			"Database marker set to {}",
			marker.map_or_else(|| "none".to_string(), |id| id.to_string())
		))
		.green()
	);
	Ok(())
}
