use agentchat::api::{tool_display_name, AgentApi, AgentSettings, DocumentFormat};
use agentchat::chat::{ConnectionStatus, Coordinator, DisplaySurface, Sender, Turn};
use agentchat::connection::ConnectionManager;
use agentchat::protocol::ArtifactPayload;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "agentchat")]
#[command(about = "Agent chat CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the agent over a persistent WebSocket (interactive).
    Chat {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Tool module to enable for every query; repeatable.
        #[arg(long, short, value_name = "MODULE")]
        tool: Vec<String>,
    },

    /// List the agent tool modules offered by the service.
    Tools {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Show the model catalog and the current agent configuration.
    Models {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Save agent model, description and skills on the service.
    SaveConfig {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Model id to run the agent with.
        #[arg(long, value_name = "ID")]
        model: Option<String>,

        /// Agent description.
        #[arg(long, default_value = "")]
        description: String,

        /// Agent skill; repeatable.
        #[arg(long = "skill", value_name = "SKILL")]
        skills: Vec<String>,
    },

    /// Convert a markdown file to PDF or DOCX using the service.
    Convert {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Markdown file to convert.
        input: PathBuf,

        /// Output format: pdf or docx.
        #[arg(long, short, default_value = "pdf")]
        format: DocumentFormat,

        /// Output file (default: input with the format's extension).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("agentchat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config).context("init failed"),
        Some(Commands::Chat { config, tool }) => run_chat(config, tool).await.context("chat failed"),
        Some(Commands::Tools { config }) => run_tools(config).await.context("tools failed"),
        Some(Commands::Models { config }) => run_models(config).await.context("models failed"),
        Some(Commands::SaveConfig {
            config,
            model,
            description,
            skills,
        }) => run_save_config(
            config,
            AgentSettings {
                model_id: model,
                description,
                skills,
            },
        )
        .await
        .context("save-config failed"),
        Some(Commands::Convert {
            config,
            input,
            format,
            output,
        }) => run_convert(config, input, format, output)
            .await
            .context("convert failed"),
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(agentchat::config::default_config_path);
    let dir = agentchat::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn api_client(config_path: Option<PathBuf>) -> anyhow::Result<AgentApi> {
    let (config, _) = agentchat::config::load_config(config_path)?;
    Ok(AgentApi::new(Some(agentchat::config::resolve_api_base_url(
        &config,
    ))))
}

async fn run_tools(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let api = api_client(config_path)?;
    for module in api.list_tools().await? {
        println!("{}\t{}", module, tool_display_name(&module));
    }
    Ok(())
}

async fn run_models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let api = api_client(config_path)?;
    let res = api.list_models().await?;
    for model in &res.models {
        let running = match model.running {
            Some(true) => " (running)",
            _ => "",
        };
        let name = if model.display_name.is_empty() {
            &model.id
        } else {
            &model.display_name
        };
        println!("{}\t{}\t{}{}", model.id, model.typ, name, running);
    }
    if let Some(description) = &res.agent_description {
        println!("description: {}", description);
    }
    if let Some(skills) = &res.agent_skills {
        println!("skills: {}", skills.join(", "));
    }
    Ok(())
}

async fn run_save_config(
    config_path: Option<PathBuf>,
    settings: AgentSettings,
) -> anyhow::Result<()> {
    let api = api_client(config_path)?;
    api.save_config(&settings).await?;
    println!("configuration saved");
    Ok(())
}

async fn run_convert(
    config_path: Option<PathBuf>,
    input: PathBuf,
    format: DocumentFormat,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let api = api_client(config_path)?;
    let markdown = std::fs::read_to_string(&input)
        .with_context(|| format!("reading {}", input.display()))?;
    let bytes = api.convert_markdown(&markdown, format).await?;
    let output = output.unwrap_or_else(|| input.with_extension(format.extension()));
    std::fs::write(&output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    println!("wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

/// Prints turns as they appear and artifacts when opened.
#[derive(Default)]
struct TerminalSurface {
    printed: Mutex<HashSet<String>>,
}

impl TerminalSurface {
    fn print_turn(turn: &Turn) {
        match turn.sender {
            Sender::User => return,
            Sender::Agent if turn.is_placeholder => println!("< ..."),
            Sender::Agent => println!("< {}", turn.text.trim()),
        }
        if let Some(link) = &turn.artifact_link {
            println!("  [{}]", link.display_text);
        }
    }
}

impl DisplaySurface for TerminalSurface {
    fn turns_changed(&self, turns: &[Turn]) {
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        for turn in turns {
            // Placeholders are keyed separately so the real reply with the same id still prints.
            let key = match (&turn.artifact_link, turn.is_placeholder) {
                (_, true) => format!("{}#typing", turn.id),
                (Some(_), false) => format!("{}#artifact", turn.id),
                (None, false) => turn.id.clone(),
            };
            if printed.insert(key) {
                Self::print_turn(turn);
            }
        }
    }

    fn artifact_selected(&self, payload: &ArtifactPayload) {
        match payload {
            ArtifactPayload::Table { columns, rows } => {
                println!("{}", columns.join("\t"));
                for row in rows {
                    let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                    println!("{}", cells.join("\t"));
                }
            }
            ArtifactPayload::Markdown { content } => println!("{}", content),
            ArtifactPayload::Plotly { .. } => match payload.plot_spec() {
                Some(Ok(spec)) => {
                    let traces = spec
                        .get("data")
                        .and_then(|d| d.as_array())
                        .map(|d| d.len())
                        .unwrap_or(0);
                    println!("plot with {} trace(s)", traces);
                }
                _ => println!("plot (unreadable spec)"),
            },
        }
    }

    fn artifact_cleared(&self) {
        println!("  (artifact cleared)");
    }

    fn status_changed(&self, status: &ConnectionStatus) {
        if status.is_error() {
            eprintln!("! {}", status.label());
        } else {
            println!("* {}", status.label());
        }
    }
}

async fn run_chat(config_path: Option<PathBuf>, tools: Vec<String>) -> anyhow::Result<()> {
    let (config, path) = agentchat::config::load_config(config_path)?;
    log::debug!("loaded config from {}", path.display());

    let manager = ConnectionManager::new(agentchat::config::connection_config(&config));
    let coordinator = Coordinator::attach(
        &manager,
        Arc::new(TerminalSurface::default()),
        config.ui.connected_banner(),
    );
    manager.connect();

    let mut selected_tools = tools;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if let Some(name) = input.strip_prefix("/tool ") {
            let name = name.trim().to_string();
            if let Some(pos) = selected_tools.iter().position(|t| *t == name) {
                selected_tools.remove(pos);
                println!("disabled {}", tool_display_name(&name));
            } else {
                println!("enabled {}", tool_display_name(&name));
                selected_tools.push(name);
            }
            continue;
        }
        if input == "/tools" {
            for tool in &selected_tools {
                println!("{}\t{}", tool, tool_display_name(tool));
            }
            continue;
        }
        if let Some(n) = input.strip_prefix("/open") {
            open_artifact(&coordinator, n.trim());
            continue;
        }
        if input == "/reconnect" {
            manager.connect();
            continue;
        }
        if input == "/status" {
            println!("{} ({})", coordinator.status().label(), manager.state());
            continue;
        }

        if let Err(e) = coordinator.submit(input, selected_tools.clone()) {
            eprintln!("chat error: {}", e);
        }
    }

    coordinator.detach();
    manager.shutdown();
    Ok(())
}

/// `/open` opens the latest artifact; `/open <n>` the n-th one (1-based).
fn open_artifact(coordinator: &Coordinator, arg: &str) {
    let linked: Vec<Turn> = coordinator
        .turns()
        .into_iter()
        .filter(|t| t.artifact_link.is_some())
        .collect();
    let turn = if arg.is_empty() {
        linked.last()
    } else {
        match arg.parse::<usize>() {
            Ok(n) if n >= 1 => linked.get(n - 1),
            _ => {
                eprintln!("usage: /open [n]");
                return;
            }
        }
    };
    match turn {
        Some(turn) => {
            coordinator.open_artifact(&turn.id);
        }
        None => eprintln!("no such artifact"),
    }
}
