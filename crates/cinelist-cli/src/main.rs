use std::io::{IsTerminal, Write};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cinelist_core::config_file::load_config;
use cinelist_core::model::{DEFAULT_SORT_BY, NewList};
use cinelist_core::{
    AuthState, Cinelist, Config, Feed, Locale, LoginFlow, MediaRef, MutationPolicy, NoticeLevel,
    TokenStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod logging;
mod output;

use output::ColorMode;

/// Browse TMDB movies and manage your lists, favorites and ratings
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// TMDB v3 API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// TMDB v4 read access token
    #[arg(long, global = true)]
    read_token: Option<String>,

    /// Language for catalog results, e.g. en-US
    #[arg(long, global = true)]
    language: Option<String>,

    /// How overlapping list edits are ordered: concurrent or serialized
    #[arg(long, global = true)]
    policy: Option<MutationPolicy>,

    /// Message language: en or ko
    #[arg(long, global = true)]
    locale: Option<Locale>,

    /// Keep the query cache in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trending movies this week
    Trending(PageArgs),
    /// Popular movies
    Popular(PageArgs),
    /// Upcoming releases in your region
    Upcoming(PageArgs),
    /// Top rated movies
    TopRated(PageArgs),
    /// Movies in theaters in your region
    NowPlaying(PageArgs),

    /// Movie details with cast, trailers and similar titles
    Movie { id: u64 },

    /// Person details with filmography
    Person { id: u64 },

    /// Search movies by title
    Search {
        /// Search terms
        query: Vec<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Read queries from stdin as you type, one per line
        #[arg(short, long)]
        interactive: bool,
    },

    /// Sign in with TMDB
    Login {
        /// Start a guest session instead (ratings only)
        #[arg(long, conflicts_with = "v3")]
        guest: bool,

        /// Use the v3 session flow (no lists)
        #[arg(long)]
        v3: bool,
    },

    /// Sign out and forget stored credentials
    Logout,

    /// Show the signed-in account
    Whoami,

    /// Show favorite, watchlist and rating state for a movie
    States { movie: u64 },

    /// Toggle a movie in your favorites
    Favorite { movie: u64 },

    /// Toggle a movie in your watchlist
    Watchlist { movie: u64 },

    /// Rate a movie on a 0-100 scale
    Rate {
        movie: u64,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },

    /// Remove your rating of a movie
    Unrate { movie: u64 },

    /// Show one of your account collections
    Collection {
        #[arg(value_enum)]
        which: Collection,
    },

    /// Show your lists
    Lists,

    /// Work with a single list
    List {
        #[command(subcommand)]
        command: ListCommand,
    },

    /// Inspect or clear the query cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Args, Debug)]
struct PageArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Collection {
    Favorites,
    Watchlist,
    Rated,
}

#[derive(Subcommand, Debug)]
enum ListCommand {
    /// Show a list's items
    Show { list: u64 },

    /// Create a list
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long)]
        public: bool,
    },

    /// Edit a list's name, description or visibility
    Edit {
        list: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        public: Option<bool>,
    },

    /// Add items, e.g. `550` or `tv:1399`
    Add {
        list: u64,
        #[arg(required = true)]
        items: Vec<MediaRef>,
    },

    /// Remove items
    Remove {
        list: u64,
        #[arg(required = true)]
        items: Vec<MediaRef>,
    },

    /// Remove every item
    Clear { list: u64 },

    /// Delete the list
    Delete { list: u64 },

    /// Check whether an item is in the list
    Status { list: u64, item: MediaRef },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Show hit and entry counts
    Stats,
    /// Drop every cached response
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.global.verbose);

    let color = ColorMode(!cli.global.no_color && std::io::stdout().is_terminal());
    let config = resolve_config(&cli.global)?;
    let app = Cinelist::new(config).context("failed to start client")?;

    let mut notices = app.notices().subscribe();
    let result = run(&app, cli.command, color).await;

    let mut stderr = std::io::stderr();
    let mut reported = false;
    while let Ok(notice) = notices.try_recv() {
        reported |= notice.level == NoticeLevel::Error;
        output::print_notice(&mut stderr, &notice, color)?;
    }

    match result {
        // The failure has already been reported as a notice.
        Err(e) if reported => {
            tracing::debug!(error = %e, "command failed");
            std::process::exit(1);
        }
        other => other,
    }
}

/// Defaults, then config files, then environment, then flags.
fn resolve_config(args: &GlobalArgs) -> anyhow::Result<Config> {
    let mut config = Config {
        cache_path: dirs::cache_dir().map(|d| d.join("cinelist").join("query_cache.db")),
        session_path: TokenStore::default_path(),
        ..Config::default()
    };
    load_config()?.apply(&mut config)?;

    if let Ok(key) = std::env::var("TMDB_API_KEY") {
        config.api_key = Some(key);
    }
    if let Ok(token) = std::env::var("TMDB_READ_TOKEN") {
        config.read_token = Some(token);
    }

    if let Some(key) = &args.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(token) = &args.read_token {
        config.read_token = Some(token.clone());
    }
    if let Some(language) = &args.language {
        config.language = language.clone();
    }
    if let Some(policy) = args.policy {
        config.mutation_policy = policy;
    }
    if let Some(locale) = args.locale {
        config.locale = locale;
    }
    if args.no_cache {
        config.cache_path = None;
    }

    if config.api_key.is_none() && config.read_token.is_none() {
        bail!("no TMDB credentials: set TMDB_API_KEY or TMDB_READ_TOKEN, or pass --api-key");
    }
    Ok(config)
}

/// Show a spinner on a terminal while `fut` runs.
async fn spin<T>(color: ColorMode, message: &str, fut: impl Future<Output = T>) -> T {
    let bar = color.enabled().then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    });
    let out = fut.await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    out
}

async fn run(app: &Cinelist, command: Command, color: ColorMode) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    let w: &mut dyn Write = &mut out;

    match command {
        Command::Trending(p) => feed(app, Feed::Trending, "Trending", p.page, w, color).await,
        Command::Popular(p) => feed(app, Feed::Popular, "Popular", p.page, w, color).await,
        Command::Upcoming(p) => feed(app, Feed::Upcoming, "Upcoming", p.page, w, color).await,
        Command::TopRated(p) => feed(app, Feed::TopRated, "Top rated", p.page, w, color).await,
        Command::NowPlaying(p) => {
            feed(app, Feed::NowPlaying, "Now playing", p.page, w, color).await
        }

        Command::Movie { id } => {
            let page = spin(color, "Loading movie...", app.catalog().movie_page(id)).await?;
            let states = if app.auth().auth_state() == AuthState::Anonymous {
                None
            } else {
                app.account().load_states(id).await.ok()
            };
            output::print_movie_page(w, &page, color)?;
            if let Some(states) = states {
                writeln!(w)?;
                output::print_states(w, id, &states, color)?;
            }
            Ok(())
        }

        Command::Person { id } => {
            let page = spin(color, "Loading person...", app.catalog().person_page(id)).await?;
            output::print_person_page(w, &page, color)?;
            Ok(())
        }

        Command::Search {
            query,
            page,
            interactive,
        } => {
            if interactive {
                return interactive_search(app, w, color).await;
            }
            let query = query.join(" ");
            if query.trim().is_empty() {
                bail!("nothing to search for");
            }
            let results = spin(color, "Searching...", app.catalog().search(&query, page)).await?;
            output::print_page(w, &format!("Results for \"{query}\""), &results, color)?;
            Ok(())
        }

        Command::Login { guest, v3 } => {
            if guest {
                spin(color, "Starting guest session...", app.auth().guest()).await?;
                writeln!(w, "Guest session started. You can rate movies.")?;
                return Ok(());
            }
            let flow = if v3 { LoginFlow::V3 } else { LoginFlow::V4 };
            login(app, flow, w, color).await
        }

        Command::Logout => {
            app.auth().logout().await?;
            Ok(())
        }

        Command::Whoami => {
            match app.auth().auth_state() {
                AuthState::Anonymous => writeln!(w, "Not signed in.")?,
                AuthState::Guest => writeln!(w, "Guest session.")?,
                AuthState::Authenticated => {
                    let account = app.auth().load_account().await?;
                    output::print_account(w, &account, color)?;
                }
            }
            Ok(())
        }

        Command::States { movie } => {
            let states = app.account().load_states(movie).await?;
            output::print_states(w, movie, &states, color)?;
            Ok(())
        }

        Command::Favorite { movie } => {
            let on = app.account().toggle_favorite(movie).await?;
            let verb = if on { "added to" } else { "removed from" };
            writeln!(w, "Movie {movie} {verb} favorites.")?;
            Ok(())
        }

        Command::Watchlist { movie } => {
            let on = app.account().toggle_watchlist(movie).await?;
            let verb = if on { "added to" } else { "removed from" };
            writeln!(w, "Movie {movie} {verb} watchlist.")?;
            Ok(())
        }

        Command::Rate { movie, percent } => {
            let value = app.account().rate(movie, percent).await?;
            writeln!(w, "Rated movie {movie}: {value:.1}/10.")?;
            Ok(())
        }

        Command::Unrate { movie } => {
            app.account().delete_rating(movie).await?;
            writeln!(w, "Rating removed.")?;
            Ok(())
        }

        Command::Collection { which } => {
            let account = app.account();
            match which {
                Collection::Favorites => {
                    let movies = spin(color, "Loading favorites...", account.favorites()).await?;
                    output::print_movies(w, &movies, color)?;
                }
                Collection::Watchlist => {
                    let movies = spin(color, "Loading watchlist...", account.watchlist()).await?;
                    output::print_movies(w, &movies, color)?;
                }
                Collection::Rated => {
                    let rated = spin(color, "Loading ratings...", account.rated()).await?;
                    output::print_rated(w, &rated, color)?;
                }
            }
            Ok(())
        }

        Command::Lists => {
            let lists = app.lists();
            spin(color, "Loading lists...", lists.load_lists()).await?;
            output::print_lists(w, &lists.lists(), color)?;
            Ok(())
        }

        Command::List { command } => list_command(app, command, w, color).await,

        Command::Cache { command } => {
            let cache = app.cache();
            match command {
                CacheCommand::Stats => output::print_cache_stats(w, &cache.stats(), color)?,
                CacheCommand::Clear => {
                    let entries = cache.len().max(cache.disk_len());
                    cache.clear();
                    writeln!(w, "Cleared {entries} cached responses.")?;
                }
            }
            Ok(())
        }
    }
}

async fn feed(
    app: &Cinelist,
    feed: Feed,
    title: &str,
    page: u32,
    w: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()> {
    let results = spin(color, "Loading...", app.catalog().feed(feed, page)).await?;
    output::print_page(w, title, &results, color)?;
    Ok(())
}

async fn login(
    app: &Cinelist,
    flow: LoginFlow,
    w: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()> {
    let pending = spin(color, "Requesting token...", app.auth().begin_login(flow, None)).await?;
    writeln!(w, "Approve access in your browser:")?;
    writeln!(w, "  {}", pending.approval_url)?;
    write!(w, "Press Enter once approved (Ctrl+C to abort)... ")?;
    w.flush()?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    let enter = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| ())
    });
    tokio::select! {
        _ = cancel.cancelled() => {
            writeln!(w)?;
            bail!("login aborted");
        }
        read = enter => read??,
    }

    let account = spin(color, "Signing in...", app.auth().complete_login(&pending)).await?;
    output::print_account(w, &account, color)?;
    Ok(())
}

/// Feed stdin lines into a debounced search and print each settled result.
async fn interactive_search(
    app: &Cinelist,
    w: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()> {
    let search = app.search();
    let mut state = search.subscribe();

    let (tx, mut lines) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    writeln!(w, "Type to search, one query per line. Ctrl+D to finish.")?;
    let mut input_open = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv(), if input_open => match line {
                Some(line) => search.set_query(line),
                None => input_open = false,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                if current.loading {
                    continue;
                }
                if let Some(error) = &current.error {
                    writeln!(w, "search failed: {error}")?;
                } else if !current.query.trim().is_empty() {
                    output::print_movies(w, &current.results, color)?;
                }
                if !input_open {
                    break;
                }
            }
        }
    }
    search.cancel();
    Ok(())
}

async fn list_command(
    app: &Cinelist,
    command: ListCommand,
    w: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()> {
    let lists = app.lists();
    match command {
        ListCommand::Show { list } => {
            let details = spin(color, "Loading list...", lists.load_list(list)).await?;
            output::print_list(w, &details, color)?;
        }

        ListCommand::Create {
            name,
            description,
            public,
        } => {
            let new_list = NewList {
                public,
                ..NewList::new(name, description)
            };
            let id = lists.create_list(&new_list).await?;
            writeln!(w, "Created list {id}.")?;
        }

        ListCommand::Edit {
            list,
            name,
            description,
            public,
        } => {
            let current = lists.load_list(list).await?;
            let new_list = NewList {
                public: public.unwrap_or(current.public),
                sort_by: current
                    .sort_by
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SORT_BY.to_string()),
                ..NewList::new(
                    name.unwrap_or(current.name),
                    description.unwrap_or(current.description),
                )
            };
            lists.update_list(list, &new_list).await?;
        }

        ListCommand::Add { list, items } => {
            lists.load_list(list).await?;
            for media in items {
                let outcome = lists.add_item(list, media).await?;
                output::print_outcome(w, &format!("add {media}"), outcome, color)?;
            }
        }

        ListCommand::Remove { list, items } => {
            lists.load_list(list).await?;
            for media in items {
                let outcome = lists.remove_item(list, media).await?;
                output::print_outcome(w, &format!("remove {media}"), outcome, color)?;
            }
        }

        ListCommand::Clear { list } => {
            lists.load_list(list).await?;
            let outcome = lists.clear_list(list).await?;
            output::print_outcome(w, "clear", outcome, color)?;
        }

        ListCommand::Delete { list } => {
            lists.load_lists().await?;
            lists.delete_list(list).await?;
        }

        ListCommand::Status { list, item } => {
            let present = lists.item_status(list, item).await?;
            let word = if present { "is" } else { "is not" };
            writeln!(w, "{item} {word} in list {list}.")?;
        }
    }
    Ok(())
}
