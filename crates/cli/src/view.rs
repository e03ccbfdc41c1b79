//! Terminal view: mirrors bus state for the current location, turns typed commands into
//! saged commands, and reconnects after a fixed delay whenever the connection drops.

use lib::board::LightBoard;
use lib::client::{Command, GroupAddress, Level, Session, SessionEvent};
use lib::project::{LocationId, Project, WidgetKind};
use std::time::Duration;

/// What the input loop should do after a line.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct View {
    session: Session,
    project: Project,
    board: LightBoard,
    reconnect_delay: Duration,
    first_connect: bool,
    /// Print every bus event, not just the ones for the current location.
    verbose: bool,
}

impl View {
    pub fn new(
        session: Session,
        project: Project,
        reconnect_delay: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            session,
            project,
            board: LightBoard::new(),
            reconnect_delay,
            first_connect: true,
            verbose,
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                println!("connected to {}", self.session.uri());
                if self.first_connect {
                    self.first_connect = false;
                    self.change_location(0);
                } else {
                    // catch up on anything that changed while we were gone
                    self.refresh();
                }
            }
            SessionEvent::Disconnected(close) => {
                println!(
                    "connection lost ({}), reconnecting in {} ms...",
                    close.code,
                    self.reconnect_delay.as_millis()
                );
                self.schedule_reconnect();
            }
            event => {
                if self.verbose {
                    println!("{} {}", timestamp(), describe(&event));
                }
                let location = self.board.location();
                for group in self.board.apply_event(&event) {
                    let placed = self
                        .project
                        .widgets
                        .get(&group)
                        .is_some_and(|w| w.locations.contains_key(&location));
                    if placed && !self.verbose {
                        println!("{} {}", timestamp(), self.row(group));
                    }
                }
            }
        }
    }

    fn schedule_reconnect(&self) {
        let session = self.session.clone();
        let delay = self.reconnect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = session.connect();
        });
    }

    /// Ask saged for the level of every widget in the project.
    fn refresh(&self) {
        let groups = self.project.group_addresses();
        if groups.is_empty() {
            return;
        }
        if let Err(e) = self.session.get_light_states(&groups) {
            log::warn!("requesting light states failed: {}", e);
        }
    }

    fn change_location(&mut self, location: LocationId) {
        let Some(name) = self.project.location_name(location) else {
            println!("no location {}", location);
            return;
        };
        println!("== {} ==", name);
        self.board.set_location(location);
        self.show();
        self.refresh();
    }

    fn show(&self) {
        for placed in self.project.widgets_at(self.board.location()) {
            if placed.widget.kind == WidgetKind::Unknown {
                log::warn!("unknown widget type for group {}", placed.group);
                continue;
            }
            println!("  {}", self.row(placed.group));
        }
    }

    fn row(&self, group: GroupAddress) -> String {
        let Some(widget) = self.project.widgets.get(&group) else {
            return format!("{:>5}  {}", group, level_text(self.board.level(group)));
        };
        let mut state = Vec::new();
        if widget.kind.has_switch() {
            state.push(if self.board.is_on(group) { "[on ]" } else { "[off]" }.to_string());
        }
        if widget.kind.has_slider() {
            state.push(level_text(self.board.level(group)));
        }
        format!("{:>5}  {:<24} {}", group, widget.name, state.join(" "))
    }

    pub fn handle_line(&mut self, line: &str) -> Flow {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Flow::Continue;
        };
        let rest: Vec<&str> = words.collect();
        let result = match verb.to_ascii_lowercase().as_str() {
            "/quit" | "/exit" | "quit" | "exit" => return Flow::Quit,
            "help" | "?" => {
                print_help();
                Ok(())
            }
            "on" | "off" => parse_groups(&rest).map(|groups| {
                for group in groups {
                    let on = verb.eq_ignore_ascii_case("on");
                    let command = self.board.switch_changed(group, on);
                    self.send(command);
                }
            }),
            "level" => parse_level_percent(&rest).map(|(group, level)| {
                let command = self.board.slider_changed(group, level);
                self.send(command);
            }),
            "ramp" => parse_ramp(&rest).map(|command| self.send(Some(command))),
            "stop" => parse_groups(&rest).map(|groups| {
                for group in groups {
                    self.send(Some(Command::LightingGroupTerminateRamp(group)));
                }
            }),
            "states" => {
                self.refresh();
                Ok(())
            }
            "show" => {
                self.show();
                Ok(())
            }
            "loc" => match rest.first().map(|s| s.parse::<LocationId>()) {
                Some(Ok(location)) => {
                    self.change_location(location);
                    Ok(())
                }
                _ => {
                    for (id, name) in &self.project.locations {
                        println!("  {}: {}", id, name);
                    }
                    Ok(())
                }
            },
            other => Err(format!("unknown command {:?} (try help)", other)),
        };
        if let Err(e) = result {
            println!("{}", e);
        }
        Flow::Continue
    }

    /// Send a command; the board only takes the new level if the session accepted it.
    fn send(&mut self, command: Option<Command>) {
        let Some(command) = command else { return };
        match self.session.send(&command) {
            Ok(()) => self.board.command_sent(&command),
            Err(e) => println!("{} not sent: {}", command.name(), e),
        }
    }
}

fn print_help() {
    println!("  on <ga>...          switch groups on");
    println!("  off <ga>...         switch groups off");
    println!("  level <ga> <0-100>  set a group's level now");
    println!("  ramp <ga> <0-1> <s> ramp a group to a level over s seconds");
    println!("  stop <ga>...        terminate ramps");
    println!("  states              refresh all levels");
    println!("  show                show the current location");
    println!("  loc [n]             list locations or change to location n");
    println!("  /quit               exit");
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn level_text(level: Option<Level>) -> String {
    match level {
        Some(l) => format!("{:>3.0}%", l * 100.0),
        None => "  ?".to_string(),
    }
}

fn source_text(source: Option<u32>) -> String {
    source.map_or_else(|| "client".to_string(), |s| format!("unit {}", s))
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::GroupOn { source, groups } => {
            format!("on {:?} (from {})", groups, source_text(*source))
        }
        SessionEvent::GroupOff { source, groups } => {
            format!("off {:?} (from {})", groups, source_text(*source))
        }
        SessionEvent::GroupRamp {
            source,
            group,
            duration,
            level,
        } => format!(
            "ramp {} to {} over {}s (from {})",
            group,
            level_text(Some(*level)).trim(),
            duration,
            source_text(*source)
        ),
        SessionEvent::States(states) => format!("states {:?}", states),
        SessionEvent::Connected => "connected".to_string(),
        SessionEvent::Disconnected(close) => format!("disconnected ({})", close),
    }
}

fn parse_groups(args: &[&str]) -> Result<Vec<GroupAddress>, String> {
    if args.is_empty() {
        return Err("expected at least one group address".to_string());
    }
    args.iter()
        .map(|a| a.parse().map_err(|_| format!("bad group address {:?}", a)))
        .collect()
}

fn parse_level_percent(args: &[&str]) -> Result<(GroupAddress, Level), String> {
    let [group, percent] = args else {
        return Err("usage: level <ga> <0-100>".to_string());
    };
    let group = group.parse().map_err(|_| format!("bad group address {:?}", group))?;
    let percent: f64 = percent.parse().map_err(|_| format!("bad level {:?}", percent))?;
    Ok((group, percent / 100.0))
}

fn parse_ramp(args: &[&str]) -> Result<Command, String> {
    let [group, level, duration] = args else {
        return Err("usage: ramp <ga> <0-1> <seconds>".to_string());
    };
    Ok(Command::LightingGroupRamp {
        group: group.parse().map_err(|_| format!("bad group address {:?}", group))?,
        level: level.parse().map_err(|_| format!("bad level {:?}", level))?,
        duration: duration.parse().map_err(|_| format!("bad duration {:?}", duration))?,
    })
}
