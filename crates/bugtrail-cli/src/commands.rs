//! CLI command implementations

use std::collections::HashMap;
use std::future::Future;

use anyhow::{Result, anyhow, bail};
use bugtrail_core::db::{CategoryNode, Dsn, NewCategory, NewUser, OrderBy, User, ROOT_CATEGORY};
use bugtrail_core::pagination::Pagination;
use bugtrail_core::service::{
    Direction, GetIssueUpdatesRequest, GetIssuesRequest, IssueQuery, NewIssueRequest,
    UpdateIssueRequest,
};
use bugtrail_core::{
    AssigneeChange, Config, Database, Issue, IssueDiff, IssueState, IssueStatus, IssueType,
    IssueUpdate, Service,
};
use colored::{ColoredString, Colorize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Loaded configuration plus global flags.
pub struct Context {
    config: Config,
    json: bool,
}

impl Context {
    pub fn new(dsn: Option<String>, json: bool) -> Result<Self> {
        let mut config = Config::load_default()?;
        if let Some(dsn) = dsn.filter(|d| !d.is_empty()) {
            config.database.dsn = dsn;
        }
        Ok(Self { config, json })
    }

    async fn service(&self) -> Result<Service> {
        Ok(Service::connect(&self.config.database).await?)
    }
}

/// Resolves user ids to usernames, one lookup per id.
struct Names<'a> {
    svc: &'a Service,
    cache: HashMap<Uuid, String>,
}

impl<'a> Names<'a> {
    fn new(svc: &'a Service) -> Self {
        Self {
            svc,
            cache: HashMap::new(),
        }
    }

    async fn of(&mut self, id: Uuid) -> String {
        if let Some(name) = self.cache.get(&id) {
            return name.clone();
        }
        let name = match self.svc.get_user(id).await {
            Ok(user) => user.username,
            Err(_) => id.to_string(),
        };
        self.cache.insert(id, name.clone());
        name
    }

    async fn of_assignee(&mut self, id: Option<Uuid>) -> String {
        match id {
            Some(id) => self.of(id).await,
            None => "-".to_string(),
        }
    }
}

/// Run a streaming read, collecting everything it sends.
async fn drain<T, F, Fut>(run: F) -> Result<Vec<T>>
where
    F: FnOnce(mpsc::Sender<T>) -> Fut,
    Fut: Future<Output = bugtrail_core::Result<()>>,
{
    let (tx, mut rx) = mpsc::channel(4);
    let collect = async {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    };
    let (res, chunks) = tokio::join!(run(tx), collect);
    res?;
    Ok(chunks)
}

fn status_colored(status: IssueStatus) -> ColoredString {
    let s = status.to_string();
    match status {
        IssueStatus::New => s.white(),
        IssueStatus::Assigned | IssueStatus::Accepted => s.yellow(),
        IssueStatus::Fixed | IssueStatus::FixedVerified => s.green(),
        _ => s.dimmed(),
    }
}

/// Status to file an issue with when none was given.
fn initial_status(status: Option<IssueStatus>, assigned: bool) -> IssueStatus {
    match status {
        Some(status) => status,
        None if assigned => IssueStatus::Assigned,
        None => IssueStatus::New,
    }
}

/// One line per changed field.
fn describe(diff: &IssueDiff, assignee: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(title) = &diff.title {
        lines.push(format!("title -> {title}"));
    }
    match (diff.assignee, assignee) {
        (Some(AssigneeChange::Unassign), _) => lines.push("assignee -> (nobody)".to_string()),
        (Some(AssigneeChange::Assign(id)), name) => {
            lines.push(format!("assignee -> {}", name.map_or_else(|| id.to_string(), str::to_string)))
        }
        (None, _) => {}
    }
    if let Some(t) = diff.issue_type {
        lines.push(format!("type -> {t}"));
    }
    if let Some(p) = diff.priority {
        lines.push(format!("priority -> P{p}"));
    }
    if let Some(s) = diff.status {
        lines.push(format!("status -> {s}"));
    }
    lines
}

fn print_issue_line(issue: &Issue) {
    println!(
        "{} [P{}] [{}] {} - {}",
        format!("#{}", issue.id).cyan(),
        issue.current.priority,
        issue.current.issue_type.to_string().blue(),
        status_colored(issue.current.status),
        issue.current.title
    );
}

async fn print_update(update: &IssueUpdate, names: &mut Names<'_>) {
    let author = names.of(update.author).await;
    println!(
        "{} {} {}",
        format!("#{}", update.id).cyan(),
        update.created.format("%Y-%m-%d %H:%M").to_string().dimmed(),
        author.bold()
    );
    let assignee = match update.diff.assignee {
        Some(AssigneeChange::Assign(id)) => Some(names.of(id).await),
        _ => None,
    };
    for line in describe(&update.diff, assignee.as_deref()) {
        println!("  {}", line.yellow());
    }
    if let Some(comment) = &update.comment {
        for line in comment.lines() {
            println!("  {line}");
        }
    }
}

pub async fn migrate(ctx: &Context) -> Result<()> {
    let dsn: Dsn = ctx.config.database.dsn.parse()?;
    let db = Database::connect_dsn(&dsn, &ctx.config.database).await?;
    db.migrate().await?;
    db.close().await;
    println!("{} Migrated {}", "✓".green(), dsn);
    Ok(())
}

fn print_user(user: &User, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(user)?);
    } else {
        println!("{} {}", user.username.bold(), user.id.to_string().dimmed());
        if let Some(name) = &user.display_name {
            println!("Name:  {name}");
        }
        if let Some(email) = &user.email {
            println!("Email: {email}");
        }
    }
    Ok(())
}

pub async fn user_add(
    ctx: &Context,
    username: String,
    email: Option<String>,
    display_name: Option<String>,
) -> Result<()> {
    let svc = ctx.service().await?;
    let user = svc
        .new_user(NewUser {
            username,
            preferences: Vec::new(),
            email,
            display_name,
        })
        .await?;
    if !ctx.json {
        print!("{} Created user: ", "✓".green());
    }
    print_user(&user, ctx.json)
}

pub async fn user_show(ctx: &Context, username: &str) -> Result<()> {
    let svc = ctx.service().await?;
    let id = svc.resolve_username(username).await?;
    let user = svc.get_user(id).await?;
    print_user(&user, ctx.json)
}

pub async fn category_add(
    ctx: &Context,
    name: String,
    parent: Option<Uuid>,
    description: String,
) -> Result<()> {
    let svc = ctx.service().await?;
    let category = svc
        .new_category(NewCategory {
            parent_id: parent.unwrap_or(ROOT_CATEGORY),
            name,
            description,
        })
        .await?;

    if ctx.json {
        println!("{}", serde_json::to_string(&category)?);
    } else {
        println!("{} Created category: {}", "✓".green(), category.name);
        println!("  Id: {}", category.id);
    }
    Ok(())
}

fn print_tree(node: &CategoryNode, indent: usize) {
    let desc = if node.category.description.is_empty() {
        String::new()
    } else {
        format!(" - {}", node.category.description)
    };
    println!(
        "{}{} {}{}",
        "  ".repeat(indent),
        node.category.name.bold(),
        node.category.id.to_string().dimmed(),
        desc
    );
    for child in &node.children {
        print_tree(child, indent + 1);
    }
}

pub async fn category_tree(ctx: &Context, id: Option<Uuid>, levels: u32) -> Result<()> {
    let svc = ctx.service().await?;
    let tree = svc.category_tree(id.unwrap_or(ROOT_CATEGORY), levels).await?;
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        print_tree(&tree, 0);
    }
    Ok(())
}

pub async fn category_rm(ctx: &Context, id: Uuid) -> Result<()> {
    let svc = ctx.service().await?;
    svc.delete_category(id).await?;
    println!("{} Deleted category {}", "✓".green(), id);
    Ok(())
}

pub struct NewIssueArgs {
    pub title: String,
    pub author: String,
    pub issue_type: IssueType,
    pub priority: i64,
    pub assignee: Option<String>,
    pub status: Option<IssueStatus>,
    pub category: Option<Uuid>,
    pub comment: Option<String>,
}

pub async fn issue_new(ctx: &Context, args: NewIssueArgs) -> Result<()> {
    let svc = ctx.service().await?;
    let author = svc.resolve_username(&args.author).await?;
    let assignee = match &args.assignee {
        Some(name) => Some(svc.resolve_username(name).await?),
        None => None,
    };

    let initial_state = IssueState {
        title: args.title,
        assignee,
        issue_type: args.issue_type,
        priority: args.priority,
        status: initial_status(args.status, assignee.is_some()),
    };
    let id = svc
        .new_issue(NewIssueRequest {
            author,
            initial_state,
            cc: Vec::new(),
            category: args.category,
            initial_comment: args.comment,
        })
        .await?;

    if ctx.json {
        println!("{}", serde_json::json!({ "id": id }));
    } else {
        println!("{} Filed issue #{}", "✓".green(), id);
    }
    Ok(())
}

async fn fetch_issue(svc: &Service, id: i64) -> Result<Issue> {
    let req = GetIssuesRequest {
        query: IssueQuery::ById(id),
        order_by: OrderBy::default(),
        direction: Direction::default(),
        pagination: None,
    };
    let chunks = drain(|tx| async move { svc.get_issues(req, &tx).await }).await?;
    chunks
        .into_iter()
        .flat_map(|c| c.issues)
        .next()
        .ok_or_else(|| anyhow!("Issue not found: {}", id))
}

pub async fn issue_show(ctx: &Context, id: i64) -> Result<()> {
    let svc = ctx.service().await?;
    let issue = fetch_issue(&svc, id).await?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&issue)?);
        return Ok(());
    }

    let mut names = Names::new(&svc);
    let state = &issue.current;
    println!("{} {}", format!("#{}", issue.id).cyan().bold(), state.title.bold());
    println!();
    println!("Status:   {}", status_colored(state.status));
    println!("Priority: P{}", state.priority);
    println!("Type:     {}", state.issue_type);
    println!("Assignee: {}", names.of_assignee(state.assignee).await);
    println!("Author:   {}", names.of(issue.author).await);
    println!("Created:  {}", issue.created.format("%Y-%m-%d %H:%M"));
    println!("Updated:  {}", issue.last_updated.format("%Y-%m-%d %H:%M"));
    if issue.category != ROOT_CATEGORY {
        println!("Category: {}", issue.category);
    }
    Ok(())
}

pub struct UpdateArgs {
    pub id: i64,
    pub author: String,
    pub comment: Option<String>,
    pub title: Option<String>,
    pub assignee: Option<String>,
    pub unassign: bool,
    pub issue_type: Option<IssueType>,
    pub priority: Option<i64>,
    pub status: Option<IssueStatus>,
}

pub async fn issue_update(ctx: &Context, args: UpdateArgs) -> Result<()> {
    let svc = ctx.service().await?;
    let author = svc.resolve_username(&args.author).await?;
    let assignee = if args.unassign {
        Some(AssigneeChange::Unassign)
    } else {
        match &args.assignee {
            Some(name) => Some(AssigneeChange::Assign(svc.resolve_username(name).await?)),
            None => None,
        }
    };

    let diff = IssueDiff {
        title: args.title,
        assignee,
        issue_type: args.issue_type,
        priority: args.priority,
        status: args.status,
    };
    if diff.is_empty() && args.comment.is_none() {
        bail!("Nothing to update: pass a comment or at least one field");
    }

    let update = svc
        .update_issue(UpdateIssueRequest {
            id: args.id,
            author,
            comment: args.comment,
            diff: Some(diff),
        })
        .await?;

    if ctx.json {
        println!("{}", serde_json::to_string(&update)?);
    } else {
        println!("{} Updated issue #{}", "✓".green(), args.id);
        let mut names = Names::new(&svc);
        print_update(&update, &mut names).await;
    }
    Ok(())
}

pub async fn issue_search(
    ctx: &Context,
    query: String,
    order_by: OrderBy,
    desc: bool,
    after: String,
    count: i64,
) -> Result<()> {
    let svc = ctx.service().await?;
    let req = GetIssuesRequest {
        query: IssueQuery::BySearch(query),
        order_by,
        direction: if desc {
            Direction::Descending
        } else {
            Direction::Ascending
        },
        pagination: Some(Pagination { after, count }),
    };

    // Print chunks as they arrive.
    let (tx, mut rx) = mpsc::channel(4);
    let json = ctx.json;
    let svc = &svc;
    let fetch = async move { svc.get_issues(req, &tx).await };
    let show = async {
        let mut all = Vec::new();
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            for issue in chunk.issues {
                if !json {
                    print_issue_line(&issue);
                }
                last = Some(issue.clone());
                all.push(issue);
            }
        }
        (all, last)
    };
    let (res, (all, last)) = tokio::join!(fetch, show);
    res?;

    if json {
        println!("{}", serde_json::to_string(&all)?);
    } else if let Some(last) = last {
        println!();
        println!("{} --after {}", "next page:".dimmed(), order_by.cursor(&last)?);
    } else {
        println!("No issues found");
    }
    Ok(())
}

pub async fn issue_history(ctx: &Context, id: i64, after: String, count: i64) -> Result<()> {
    let svc = ctx.service().await?;
    let req = GetIssueUpdatesRequest {
        id,
        pagination: Some(Pagination { after, count }),
    };
    let chunks = drain(|tx| {
        let svc = &svc;
        async move { svc.get_issue_updates(req, &tx).await }
    })
    .await?;

    let mut current = None;
    let mut updates = Vec::new();
    for chunk in chunks {
        current = current.or(chunk.current);
        updates.extend(chunk.updates);
    }

    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "issue": current, "updates": updates }))?
        );
        return Ok(());
    }

    if let Some(issue) = &current {
        print_issue_line(issue);
        println!();
    }
    if updates.is_empty() {
        println!("No updates");
    }
    let mut names = Names::new(&svc);
    for update in &updates {
        print_update(update, &mut names).await;
    }
    Ok(())
}

pub fn config_show(ctx: &Context) -> Result<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&ctx.config)?);
    } else {
        if let Some(path) = Config::default_path() {
            println!("{} {}", "Config file:".bold(), path.display());
            println!();
        }
        print!("{}", toml::to_string_pretty(&ctx.config)?);
    }
    Ok(())
}

pub fn config_init(force: bool) -> Result<()> {
    let path = Config::default_path().ok_or_else(|| anyhow!("No config directory on this system"))?;
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, Config::default_with_comments())?;
    println!("{} Wrote {}", "✓".green(), path.display());
    Ok(())
}
