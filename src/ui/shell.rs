use crate::controller::{ControllerHandle, ControllerState, ListingSource, UiCommand};
use crate::models::Station;
use crate::player::PlaybackPhase;
use crate::regions::REGIONS;
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  regions                 list regions
  region <id>             stations for a region
  search <text>           search stations by name
  popular                 top voted stations
  favs                    saved stations
  play <n>                play entry n of the current list
  fav [n]                 toggle favorite for entry n (or the playing station)
  pause | resume | toggle | stop
  vol <0-100>             set volume
  signin <email> <pass>   sign in
  signup <email> <pass>   create an account
  signout                 sign out
  profile <name>          set display name
  premium                 activate premium
  history                 most played stations
  status | help | quit";

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Send(UiCommand),
    Help,
    Regions,
    Status,
    Quit,
}

pub async fn run(handle: &ControllerHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state_rx = handle.state_rx.clone();
    let mut shown = state_rx.borrow_and_update().clone();

    println!("{HELP}");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line, &shown) {
                    Ok(Action::Send(cmd)) => {
                        if handle.cmd_tx.send(cmd).is_err() {
                            println!("player stopped");
                            break;
                        }
                    }
                    Ok(Action::Help) => println!("{HELP}"),
                    Ok(Action::Regions) => print_regions(),
                    Ok(Action::Status) => println!("{}", status_line(&shown)),
                    Ok(Action::Quit) => break,
                    Err(msg) if msg.is_empty() => {}
                    Err(msg) => println!("{msg}"),
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    println!("player stopped");
                    break;
                }
                let next = state_rx.borrow_and_update().clone();
                for out in render_changes(&shown, &next) {
                    println!("{out}");
                }
                shown = next;
            }
        }
    }
    Ok(())
}

fn parse_command(line: &str, state: &ControllerState) -> std::result::Result<Action, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let cmd = match word {
        "" => return Err(String::new()),
        "help" | "?" => return Ok(Action::Help),
        "regions" => return Ok(Action::Regions),
        "status" => return Ok(Action::Status),
        "quit" | "exit" | "q" => return Ok(Action::Quit),
        "region" => UiCommand::Region(required(rest, "region <id>")?.to_lowercase()),
        "search" | "s" => UiCommand::Search(rest.to_string()),
        "popular" => UiCommand::Popular,
        "favs" | "favorites" => UiCommand::ShowFavorites,
        "play" | "p" => UiCommand::Play(pick(state, rest)?),
        "fav" => match rest {
            "" => UiCommand::ToggleFavorite(
                state
                    .playback
                    .station
                    .clone()
                    .ok_or_else(|| "nothing is playing".to_string())?,
            ),
            n => UiCommand::ToggleFavorite(pick(state, n)?),
        },
        "pause" => UiCommand::Pause,
        "resume" => UiCommand::Resume,
        "toggle" | "t" => UiCommand::TogglePause,
        "stop" => UiCommand::Stop,
        "vol" | "volume" => {
            let pct: f32 = required(rest, "vol <0-100>")?
                .parse()
                .map_err(|_| "volume must be a number".to_string())?;
            UiCommand::SetVolume(pct / 100.0)
        }
        "signin" | "signup" => {
            let usage = format!("{word} <email> <password>");
            let (email, password) = required(rest, &usage)?
                .split_once(char::is_whitespace)
                .ok_or(usage)?;
            let (email, password) = (email.to_string(), password.trim().to_string());
            if word == "signin" {
                UiCommand::SignIn { email, password }
            } else {
                UiCommand::SignUp { email, password }
            }
        }
        "signout" => UiCommand::SignOut,
        "profile" => UiCommand::UpdateProfile {
            display_name: required(rest, "profile <name>")?.to_string(),
            avatar_url: state
                .user
                .as_ref()
                .and_then(|u| u.avatar_url())
                .map(str::to_string),
        },
        "premium" => UiCommand::ActivatePremium,
        "history" => UiCommand::ShowHistory,
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Action::Send(cmd))
}

fn required<'a>(rest: &'a str, usage: &str) -> std::result::Result<&'a str, String> {
    if rest.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(rest)
    }
}

/// Entries are numbered from 1 on screen.
fn pick(state: &ControllerState, n: &str) -> std::result::Result<Station, String> {
    let idx: usize = n.parse().map_err(|_| format!("not an entry number: {n}"))?;
    idx.checked_sub(1)
        .and_then(|i| state.listing.get(i))
        .cloned()
        .ok_or_else(|| format!("no entry {idx} in the current list"))
}

fn print_regions() {
    for r in REGIONS {
        let n = r.countries.len();
        let unit = if n == 1 { "country" } else { "countries" };
        println!("  {} {:<14} {:<16} {n} {unit}", r.emoji, r.id, r.name);
    }
}

fn render_changes(prev: &ControllerState, next: &ControllerState) -> Vec<String> {
    let mut out = Vec::new();

    if prev.user != next.user || prev.premium != next.premium {
        out.push(match &next.user {
            Some(u) => {
                let name = u.display_name().or(u.email.as_deref()).unwrap_or(&u.id);
                let tier = if next.premium { " (premium)" } else { "" };
                format!("signed in as {name}{tier}")
            }
            None => "browsing as guest".to_string(),
        });
    }

    if prev.source != next.source
        || prev.listing != next.listing
        || prev.listing_loading != next.listing_loading
        || prev.error != next.error
    {
        if next.listing_loading {
            out.push(format!("{}: loading…", source_title(&next.source)));
        } else if let Some(err) = &next.error {
            out.push(err.clone());
        } else {
            out.extend(listing_lines(next));
        }
    }

    if prev.playback != next.playback {
        out.push(status_line(next));
    }

    if prev.top_listens != next.top_listens {
        if next.top_listens.is_empty() {
            out.push("no listens yet".to_string());
        }
        for (i, l) in next.top_listens.iter().enumerate() {
            out.push(format!("{:>3}. {} ({} plays)", i + 1, l.name, l.count));
        }
    }

    if prev.notice != next.notice {
        out.extend(next.notice.clone());
    }

    out
}

fn source_title(source: &ListingSource) -> String {
    match source {
        ListingSource::None => "stations".to_string(),
        ListingSource::Region(id) => format!("region {id}"),
        ListingSource::Search(q) => format!("search \"{q}\""),
        ListingSource::Popular => "popular".to_string(),
        ListingSource::Favorites => "favorites".to_string(),
    }
}

fn listing_lines(state: &ControllerState) -> Vec<String> {
    let mut out = vec![format!("{}:", source_title(&state.source))];
    if state.listing.is_empty() {
        out.push(match state.source {
            ListingSource::Favorites => "  no favorites yet".to_string(),
            _ => "  no stations found".to_string(),
        });
    }
    for (i, s) in state.listing.iter().enumerate() {
        let star = if state.is_favorite(&s.stationuuid) { "★" } else { "☆" };
        let subtitle = station_subtitle(s);
        let name = ellipsize_chars(&s.name, 40);
        if subtitle.is_empty() {
            out.push(format!("{:>3}. {star} {name}", i + 1));
        } else {
            out.push(format!("{:>3}. {star} {name}  [{subtitle}]", i + 1));
        }
    }
    out
}

fn status_line(state: &ControllerState) -> String {
    let pb = &state.playback;
    let phase = match pb.phase() {
        PlaybackPhase::Idle => "stopped",
        PlaybackPhase::Loading => "loading",
        PlaybackPhase::Playing => "playing",
        PlaybackPhase::Paused => "paused",
        PlaybackPhase::Errored => "error",
    };
    let mut line = format!(
        "[{phase}] {} · vol {}%",
        ellipsize_chars(&state.label_text(), 40),
        (pb.volume * 100.0).round()
    );
    if let (Some(title), Some(_)) = (&pb.media_title, &pb.station) {
        line.push_str(&format!(" · {title}"));
    }
    if let Some(err) = &pb.error {
        if pb.phase() == PlaybackPhase::Errored {
            line.push_str(&format!(" · {err}"));
        }
    }
    line
}

// Simple char-based ellipsis
fn ellipsize_chars(s: &str, max_chars: usize) -> String {
    let mut it = s.chars();
    let taken: String = it.by_ref().take(max_chars).collect();
    if it.next().is_some() {
        format!("{taken}…")
    } else {
        taken
    }
}

fn station_subtitle(s: &Station) -> String {
    let mut parts: Vec<String> = Vec::new();
    let country = s.country.trim();
    if !country.is_empty() {
        parts.push(country.to_string());
    }
    let codec = s.codec.trim();
    if !codec.is_empty() {
        parts.push(codec.to_string());
    }
    if s.bitrate > 0 {
        parts.push(format!("{} kbps", s.bitrate));
    }
    if let Some(tag) = s.tag_list().first() {
        parts.push(tag.to_string());
    }
    parts.join(" · ")
}
