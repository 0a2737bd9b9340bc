//! `browse` plugin: `/browse [-N]` opens the URLs of a buffer line in the
//! configured web browser.

use std::time::Duration;

use {
    anyhow::Result,
    chathook_common::{BufferRef, ContextData, Event, HandlerAction},
    tracing::{debug, info},
};

use crate::api::{Plugin, PluginApi};

/// Option naming the browser command, e.g. `firefox` or `lynx -dump`.
pub const BROWSER_OPTION: &str = "webbrowser";

const SCHEMES: &[&str] = &["http://", "https://", "ftp://"];

pub struct BrowsePlugin;

impl Plugin for BrowsePlugin {
    fn name(&self) -> &str {
        "browse"
    }

    fn register(&self, api: &mut PluginApi<'_>) -> Result<()> {
        api.hook_command(
            "browse",
            "open the URLs of the N-th last line of the current buffer in the web browser",
            "[-N]",
            on_browse,
        )?;
        api.hook_config(
            BROWSER_OPTION,
            |_, _, event| {
                debug!(browser = event.text(0), "web browser changed");
                Ok(HandlerAction::Ok)
            },
            ContextData::none(),
        )?;
        Ok(())
    }
}

fn on_browse(api: &mut PluginApi<'_>, _: &ContextData, event: &Event) -> Result<HandlerAction> {
    let buffer = api.current_buffer();
    let Some(back) = parse_line_offset(event.text(0).unwrap_or_default()) else {
        api.print(&buffer, "browse: usage: /browse [-N]");
        return Ok(HandlerAction::OkEat);
    };

    let Some(browser) = api
        .config(BROWSER_OPTION)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
    else {
        api.print(
            &buffer,
            "browse: no web browser configured, set option \"webbrowser\"",
        );
        return Ok(HandlerAction::OkEat);
    };

    let lines = api.buffer_lines(&buffer);
    let Some(line) = lines.len().checked_sub(back).and_then(|i| lines.get(i)) else {
        api.print(&buffer, &format!("browse: buffer has no line -{back}"));
        return Ok(HandlerAction::OkEat);
    };

    let urls = extract_urls(line);
    if urls.is_empty() {
        api.print(&buffer, "browse: no URL found in that line");
        return Ok(HandlerAction::OkEat);
    }

    // Each URL stays one argument whatever quotes it holds.
    let command_line = format!("{browser} {}", shlex::try_join(urls.iter().copied())?);
    info!(count = urls.len(), %buffer, "opening urls");
    api.spawn_process(
        &command_line,
        Duration::ZERO,
        on_browser_exit,
        ContextData::new(buffer),
    )?;
    Ok(HandlerAction::OkEat)
}

fn on_browser_exit(
    api: &mut PluginApi<'_>,
    ctx: &ContextData,
    event: &Event,
) -> Result<HandlerAction> {
    let Some(report) = event.process() else {
        return Ok(HandlerAction::Ok);
    };
    if report.success() {
        return Ok(HandlerAction::Ok);
    }
    let buffer = ctx.get::<BufferRef>().cloned().unwrap_or_else(BufferRef::core);
    let detail = report.stderr.lines().next().unwrap_or_default();
    let message = if detail.is_empty() {
        format!("browse: browser {}", report.status)
    } else {
        format!("browse: browser {}: {detail}", report.status)
    };
    api.print(&buffer, &message);
    Ok(HandlerAction::Ok)
}

/// `""` is the last line, `-N` the N-th last one.
fn parse_line_offset(args: &str) -> Option<usize> {
    let args = args.trim();
    if args.is_empty() {
        return Some(1);
    }
    args.strip_prefix('-')
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
}

/// Every whitespace-separated token starting with a known scheme, stripped of
/// surrounding punctuation.
fn extract_urls(line: &str) -> Vec<&str> {
    line.split_whitespace()
        .map(|token| {
            token
                .trim_start_matches(['<', '(', '[', '"', '\''])
                .trim_end_matches(['>', ')', ']', '"', '\'', ',', '.', ';', ':', '!', '?'])
        })
        .filter(|token| {
            SCHEMES.iter().any(|scheme| {
                token.len() > scheme.len()
                    && token
                        .get(..scheme.len())
                        .is_some_and(|p| p.eq_ignore_ascii_case(scheme))
            })
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("", Some(1))]
    #[case("  ", Some(1))]
    #[case("-1", Some(1))]
    #[case("-3", Some(3))]
    #[case("-0", None)]
    #[case("3", None)]
    #[case("-x", None)]
    fn line_offsets(#[case] args: &str, #[case] expected: Option<usize>) {
        assert_eq!(parse_line_offset(args), expected);
    }

    #[test]
    fn extracts_urls_in_order() {
        let line = "<flashy> see http://a.example/x and (https://b.example/y), also ftp://c.example.";
        assert_eq!(extract_urls(line), vec![
            "http://a.example/x",
            "https://b.example/y",
            "ftp://c.example",
        ]);
    }

    #[rstest]
    #[case(&["http://a.example/x", "https://b.example/y"])]
    #[case(&["http://example.com/it's"])]
    #[case(&["http://example.com/?q=\"quoted\"&x=a\\b"])]
    fn url_arguments_split_back_unchanged(#[case] urls: &[&str]) {
        let line = shlex::try_join(urls.iter().copied()).unwrap();
        assert_eq!(shlex::split(&line).unwrap(), urls);
    }

    #[test]
    fn plain_urls_are_joined_unquoted() {
        let urls = ["http://a.example/x", "https://b.example/y"];
        assert_eq!(
            shlex::try_join(urls).unwrap(),
            "http://a.example/x https://b.example/y"
        );
    }

    #[test]
    fn ignores_bare_schemes_and_other_words() {
        assert!(extract_urls("http:// is not a url, nor is www.example.com").is_empty());
        assert_eq!(extract_urls("HTTPS://LOUD.example"), vec!["HTTPS://LOUD.example"]);
    }
}
