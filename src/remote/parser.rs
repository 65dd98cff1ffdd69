//! Parsers for the textual output of the CREAM command line tools.
//!
//! Status tools print one attribute per line, as `key = [value]`, optionally decorated with
//! leading asterisks and tabulations. When several jobs are queried, each job block starts with
//! its `JobID` attribute. With the `-L1` verbosity, every status change of a job is printed as a
//! `Status = [STATUS: timestamp]` line, oldest first.
//!
//! All parsers of this module are total: lines they do not understand are skipped, and no input
//! makes them fail.

use nom::bytes::complete::{tag, take_till1, take_until};
use nom::character::complete::char;
use nom::combinator::rest;
use nom::sequence::{pair, preceded, separated_pair};
use nom::IResult;
use std::collections::{HashMap, HashSet};
use super::status::{Infos, RemoteStatus, Transition};

/// Phrase printed by the output retrieval tool for each job whose sandbox has been fetched.
const RETRIEVAL_CONFIRMATION: &str = "output will be stored";

/// Parse the output of a single job status query into a flat attribute record.
pub fn parse_status(input: &str) -> Infos {
    let mut infos = Infos::new();

    for (key, value) in attributes(input) {
        infos.set(key, value);
    };

    infos
}

/// Parse the output of a multiple jobs status query, with or without history, into records
/// indexed by job identifiers.
pub fn parse_statuses(input: &str) -> HashMap<String, Infos> {
    let mut records = HashMap::new();
    let mut current: Option<String> = None;

    for (key, value) in attributes(input) {
        if key == "JobID" {
            records.insert(value.to_string(), Infos::new());
            current = Some(value.to_string());
            continue;
        };
        let infos = match current.as_ref().and_then(|jobid| records.get_mut(jobid)) {
            Some(infos) => infos,
            None => continue,
        };
        if key == "Status" {
            if let Some(transition) = transition(value) {
                infos.status = Some(transition.status.clone());
                infos.history.push(transition);
            };
        } else {
            infos.set(key, value);
        };
    };

    records
}

/// Parse the output of an output retrieval, returning identifiers of jobs whose output has been
/// confirmed as fetched.
pub fn parse_retrieved(input: &str) -> HashSet<String> {
    let mut retrieved = HashSet::new();

    for line in input.lines() {
        if !line.contains(RETRIEVAL_CONFIRMATION) {
            continue;
        };
        if let Ok((_, jobid)) = bracketed_uri(line) {
            retrieved.insert(jobid.to_string());
        };
    };

    retrieved
}

/// Iterate over all `key = [value]` attributes of the given input, skipping echoed commands.
fn attributes(input: &str) -> impl Iterator<Item = (&str, &str)> {
    input.lines()
        .filter_map(|line| key_value(line).ok())
        .map(|(_, (key, value))| (clean_key(key), clean_value(value)))
        .filter(|(key, _)| !key.contains("Command"))
}

fn key_value(line: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(take_until("="), char('='), rest)(line)
}

fn clean_key(key: &str) -> &str {
    key.trim_matches(|c: char| c == '\t' || c == '*' || c == ' ')
}

fn clean_value(value: &str) -> &str {
    let value = value.trim();
    let value = value.strip_prefix('[').unwrap_or(value);

    value.strip_suffix(']').unwrap_or(value)
}

/// Split a history status value like `DONE-OK: 2020-01-01 10:00:00` into its transition.
fn transition(value: &str) -> Option<Transition> {
    let (_, (token, timestamp)) = status_and_timestamp(value.trim()).ok()?;
    let token = token.trim_end_matches(|c: char| c == ':' || c == ']');
    if token.is_empty() {
        return None;
    };
    let timestamp = timestamp.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '[' || c == ']');

    Some(Transition::new(RemoteStatus::parse(token), timestamp))
}

fn status_and_timestamp(input: &str) -> IResult<&str, (&str, &str)> {
    pair(take_till1(|c: char| c.is_whitespace()), rest)(input)
}

fn bracketed_uri(line: &str) -> IResult<&str, &str> {
    preceded(pair(take_until("[https"), tag("[")), take_until("]"))(line)
}
