// LabForge: Kathara lab compiler written in Rust
// Copyright (C) 2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use kathara_lab::{
    cleanup_stale, config::CONFIG, is_active, normalize_command_args, ContainerExec, KatharaLab,
    LocalRunner,
};
use labforge::{
    broadcast::{LogBroadcast, LogMessage, DEFAULT_CAPACITY},
    compile_to_archive,
    project::{scada_machine_names, set_scada_project_content, stamp_meta, Project, ProjectStore},
    startup::FUXA_PROJECT_PATH,
    CompilerOptions,
};

/// Compile network topologies into Kathara labs, and drive their lifecycle.
#[derive(Debug, Parser)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile a project into a lab archive.
    Compile {
        /// Path to a project file, or the name of a saved project.
        project: String,
        /// Path of the archive. Defaults to `<labs_dir>/<lab name>.zip`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile a project and start the lab.
    Start {
        /// Path to a project file, or the name of a saved project.
        project: String,
        /// Do not clean up labs that were left behind by a previous run.
        #[arg(long)]
        keep_stale: bool,
    },
    /// Stop a running lab and remove its working directory.
    Stop {
        /// Name of the lab
        lab: String,
    },
    /// Stop every lab that is neither running nor locked by another process.
    Cleanup,
    /// Execute a command inside a container.
    Exec {
        /// Container name, or the image of the container.
        container: String,
        /// Split the arguments on commas and whitespace, and remove duplicates.
        #[arg(short, long)]
        normalize: bool,
        /// The command and its arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
    /// Print the logs of a container.
    Logs {
        /// Container name, or the image of the container.
        container: String,
        /// Only print the last lines.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// List the local images of the device catalog.
    Images,
    /// Build the image of a device from the compose file.
    Build {
        /// Name of the compose service
        service: String,
    },
    /// Manage saved projects.
    #[command(subcommand)]
    Projects(ProjectsCommand),
}

#[derive(Debug, Subcommand)]
enum ProjectsCommand {
    /// List all saved projects.
    List,
    /// Save a project file under a name.
    Save {
        /// Name of the saved project
        name: String,
        /// Project file to save
        file: PathBuf,
    },
    /// Delete a saved project.
    Delete {
        /// Name of the saved project
        name: String,
    },
    /// Copy the SCADA projects of the running containers back into a saved project.
    Pull {
        /// Name of the saved project
        name: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();

    let args = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args.command))
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let store = ProjectStore::new(&CONFIG.saves_dir);
    let events = LogBroadcast::new(DEFAULT_CAPACITY);
    let mut subscription = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(msg) = subscription.recv().await {
            print_event(&msg);
        }
    });

    let result = dispatch(&store, &events, command).await;
    if let Err(e) = result.as_ref() {
        events.error(e.to_string());
    }
    // closing the channel stops the printer once all messages are printed.
    drop(events);
    printer.await?;
    result
}

async fn dispatch(
    store: &ProjectStore,
    events: &LogBroadcast,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Compile { project, output } => {
            let project = load_project(store, &project)?;
            let output = output.unwrap_or_else(|| {
                CONFIG
                    .labs_dir
                    .join(format!("{}.zip", project.lab_info.lab_name()))
            });
            let lab = compile_to_archive(
                &project.machines,
                &project.lab_info,
                &CompilerOptions::from(&*CONFIG),
                &output,
            )?;
            events.log(format!(
                "Compiled {} machines into {}",
                lab.machines.len(),
                output.display()
            ));
            Ok(())
        }
        Command::Start {
            project,
            keep_stale,
        } => start(store, events, &project, keep_stale).await,
        Command::Stop { lab } => {
            events.log(format!("Stopping lab {lab}"));
            KatharaLab::new(&lab)?.resume()?.stop().await?;
            events.log(format!("Lab {lab} stopped"));
            Ok(())
        }
        Command::Cleanup => {
            for lab in cleanup_stale(&LocalRunner, &CONFIG).await? {
                events.log(format!("Cleaned up lab {lab}"));
            }
            Ok(())
        }
        Command::Exec {
            container,
            normalize,
            args,
        } => {
            let args = if normalize {
                normalize_command_args(&args)
            } else {
                args
            };
            let output = ContainerExec::new().exec(&container, &args).await?;
            print!("{}", output.stdout_lossy());
            eprint!("{}", output.stderr_lossy());
            if !output.success() {
                events.warn(format!("Command exited with code {}", output.exit_code));
            }
            Ok(())
        }
        Command::Logs { container, tail } => {
            print!("{}", ContainerExec::new().logs(&container, tail).await?);
            Ok(())
        }
        Command::Images => {
            for image in ContainerExec::new().images().await? {
                println!("{image}");
            }
            Ok(())
        }
        Command::Build { service } => {
            events.log(format!("Building image {service}"));
            for line in ContainerExec::new().build_image(&service).await? {
                println!("{line}");
            }
            events.log(format!("Image {service} built"));
            Ok(())
        }
        Command::Projects(cmd) => projects(store, events, cmd).await,
    }
}

async fn start(
    store: &ProjectStore,
    events: &LogBroadcast,
    project: &str,
    keep_stale: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !keep_stale {
        for lab in cleanup_stale(&LocalRunner, &CONFIG).await? {
            events.warn(format!("Cleaned up stale lab {lab}"));
        }
    }

    let project = load_project(store, project)?;
    let name = project.lab_info.lab_name();
    let lab = KatharaLab::new(&name)?;
    let archive = lab.archive_path();
    if is_active(&CONFIG, &name) {
        events.warn(format!("Lab {name} is already running, restarting it"));
    }

    events.log(format!("Compiling lab {name}"));
    compile_to_archive(
        &project.machines,
        &project.lab_info,
        &CompilerOptions::from(&*CONFIG),
        &archive,
    )?;

    events.log(format!("Starting lab {name}"));
    // the lab stays marked as running after this process exits, until `labforge stop`.
    let lab = lab.start(&archive).await?;
    events.log(format!("Lab {name} is running in {}", lab.lab_dir().display()));
    Ok(())
}

async fn projects(
    store: &ProjectStore,
    events: &LogBroadcast,
    cmd: ProjectsCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ProjectsCommand::List => {
            for name in store.list()? {
                println!("{name}");
            }
        }
        ProjectsCommand::Save { name, file } => {
            let mut value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            // make sure the file is a project before storing it.
            Project::from_value(value.clone())?;
            stamp_meta(&mut value);
            let file_name = store.save(&name, &value)?;
            events.log(format!("Saved project {file_name}"));
        }
        ProjectsCommand::Delete { name } => {
            store.delete(&name)?;
            events.log(format!("Deleted project {name}"));
        }
        ProjectsCommand::Pull { name } => {
            let mut value = store.load(&name)?;
            let exec = ContainerExec::new();
            for machine in scada_machine_names(&value) {
                match exec.read_file_base64(&machine, FUXA_PROJECT_PATH).await {
                    Ok(content) => {
                        set_scada_project_content(&mut value, &machine, content);
                        events.log(format!("Pulled the SCADA project of {machine}"));
                    }
                    Err(e) => {
                        events.warn(format!("Cannot pull the SCADA project of {machine}: {e}"));
                    }
                }
            }
            store.save(&name, &value)?;
        }
    }
    Ok(())
}

/// Interpret the argument as path to a project file if it exists, and as the name of a saved
/// project otherwise.
fn load_project(store: &ProjectStore, project: &str) -> Result<Project, Box<dyn std::error::Error>> {
    let path = Path::new(project);
    if path.is_file() {
        Ok(Project::from_file(path)?)
    } else {
        Ok(store.load_project(project)?)
    }
}

fn print_event(msg: &LogMessage) {
    println!("{} [{}] {}", msg.time, msg.level, msg.message);
}
