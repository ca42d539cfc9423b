use once_cell::sync::Lazy;
use regex::Regex;

use crate::series::{EpisodeInfo, EpisodeNumber, VideoType};

/// Turns a series title into something every common filesystem accepts,
/// keeping as much of the original wording as possible. Returns `None` if
/// nothing usable is left.
pub fn prepare_series_name_for_file(name: &str) -> Option<String> {
    const NAME_LIMIT: usize = 160;

    let no_control_chars = name.replace(|c: char| c.is_control(), "");
    let no_special_spaces = no_control_chars.replace(char::is_whitespace, " ");
    let no_quotes = no_special_spaces.replace('\"', "");

    static COLON_V1_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([\p{LETTER}[:digit:]]): +([\p{LETTER}[:digit:]])").unwrap());
    static COLON_V2_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([\p{LETTER}[:digit:]]):([\p{LETTER}[:digit:]])").unwrap());
    let no_colon = COLON_V1_REGEX.replace_all(&no_quotes, r"${1} - ${2}");
    let no_colon = COLON_V2_REGEX.replace_all(&no_colon, r"${1} ${2}");
    let no_colon = no_colon.replace(':', "");

    static QUESTION_MARKS_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([\p{LETTER}[:digit:]])\?+ +([\p{LETTER}[:digit:]])").unwrap());
    let no_question_marks = QUESTION_MARKS_REGEX.replace_all(&no_colon, r"${1} - ${2}");
    let no_question_marks = no_question_marks.replace('?', "");

    static SLASH_V1_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\b([\p{LETTER}[:digit:]])/+([\p{LETTER}[:digit:]])\b").unwrap());
    static SLASH_V2_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([\p{LETTER}[:digit:]])/+([\p{LETTER}[:digit:]])").unwrap());
    let no_slashs = SLASH_V1_REGEX.replace_all(&no_question_marks, r"${1}${2}");
    let no_slashs = SLASH_V2_REGEX.replace_all(&no_slashs, r"${1} ${2}");
    let no_slashs = no_slashs.replace('/', "");

    let no_extra = no_slashs.replace(['\\', '*', '<', '>', '|'], "");

    static MULTIPLE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
    let no_multiple_space = MULTIPLE_SPACE.replace_all(&no_extra, " ");
    let no_dot_or_space_at_ends = no_multiple_space.trim_matches(|c: char| c == ' ' || c == '.');

    if no_dot_or_space_at_ends.is_empty() {
        None
    } else {
        let mut total_bytes = 0;

        Some(
            no_dot_or_space_at_ends
                .chars()
                .take_while(|c| {
                    total_bytes += c.len_utf8();
                    total_bytes <= NAME_LIMIT
                })
                .collect(),
        )
    }
}

/// Canonical episode filename, without extension:
/// `<series> - SxxEyy [- <variant>] [- <title>]`. Absent parts drop their
/// surrounding separator.
pub fn get_episode_name(
    series_name: Option<&str>,
    video_type: Option<&VideoType>,
    episode_info: &EpisodeInfo,
    include_title_if_possible: bool,
) -> String {
    let mut output_name = String::new();

    if let Some(series_name) = series_name {
        output_name.push_str(series_name);
        output_name.push_str(" - ");
    }

    if let Some(season) = episode_info.season_number {
        output_name.push_str(&format!("S{:02}", season));
    }

    let alignment_episode_number = episode_info
        .max_episode_number_in_season
        .map(|max_num| ((max_num.checked_ilog10().unwrap_or(0) + 1) as usize).max(2));

    output_name.push('E');
    output_name.push_str(&format_episode_number(
        &episode_info.episode_number,
        alignment_episode_number,
    ));

    if let Some(video_type) = video_type {
        let suffix = video_type.suffix();

        if !suffix.is_empty() {
            output_name.push_str(&format!(" - {}", suffix));
        }
    }

    if include_title_if_possible {
        if let Some(title) = &episode_info.name {
            output_name.push_str(&format!(" - {}", title));
        }
    }

    output_name
}

fn format_episode_number(episode_number: &EpisodeNumber, alignment_episode_number: Option<usize>) -> String {
    match episode_number {
        EpisodeNumber::Number(episode_number) => {
            format!("{episode_number:0>fill$}", fill = alignment_episode_number.unwrap_or(2))
        }
        EpisodeNumber::String(episode_number) => {
            let trimmed_episode_number = episode_number.trim();

            if let Some((pre, post)) = trimmed_episode_number.split_once(['.', ',']) {
                let pre_all_digits = pre.bytes().all(|b| b.is_ascii_digit());
                let post_all_digits = post.bytes().all(|b| b.is_ascii_digit());

                if pre_all_digits && post_all_digits {
                    let delim = trimmed_episode_number.as_bytes()[pre.len()] as char;
                    return format!(
                        "{pre:0>fill$}{delim}{post}",
                        fill = alignment_episode_number.unwrap_or(2)
                    );
                }
            }

            trimmed_episode_number.to_owned()
        }
    }
}

/// Library folder name for a series. Coarser than
/// [`prepare_series_name_for_file`]: forbidden characters are dropped
/// without any rewriting of the surrounding text.
pub fn clean_folder_name(raw_name: &str) -> String {
    static ILLEGAL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap());
    static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

    let name = raw_name.trim();
    let name = ILLEGAL_CHARS.replace_all(name, "");
    let name = MULTI_SPACE.replace_all(&name, " ");

    name.trim_matches(|c: char| c == ' ' || c == '.').to_string()
}
