use iocraft::prelude::*;

use crate::uploader::{FileOutcome, UploadReport};

/// Renders a byte count with a binary unit, trimming to one decimal.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    // Rounding to one decimal can land on 1024.0; promote to the next unit
    // instead of printing it.
    size = (size * 10.0).round() / 10.0;
    if size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[derive(Default, Props)]
struct OutcomeIconProps {
    outcome: Option<FileOutcome>,
}

#[component]
fn OutcomeIcon(props: &OutcomeIconProps) -> impl Into<AnyElement<'static>> {
    match props.outcome {
        Some(FileOutcome::Uploaded { .. }) => element! {
            Text (
                color: Color::Green,
                content: "◆"
            )
        }
        .into_any(),
        Some(FileOutcome::MissingLocal) => element! {
            Text (
                color: Color::Yellow,
                content: "◇"
            )
        }
        .into_any(),
        _ => element! {
            Text (
                color: Color::Red,
                content: "❓"
            )
        }
        .into_any(),
    }
}

#[derive(Default, Props)]
struct FileOutcomeRowProps {
    name: String,
    outcome: Option<FileOutcome>,
}

#[component]
fn FileOutcomeRow(props: &FileOutcomeRowProps) -> impl Into<AnyElement<'static>> {
    let detail = match &props.outcome {
        Some(FileOutcome::Uploaded { bytes }) => format!(" ({})", format_size(*bytes)),
        Some(FileOutcome::MissingLocal) => " (missing locally)".to_string(),
        None => String::new(),
    };
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "│ ")
            OutcomeIcon(outcome: props.outcome.clone())
            Text(weight: Weight::Bold, content: format!(" {}", &props.name))
            Text(content: detail)
        }
    }
}

#[derive(Default, Props)]
pub struct UploadReportViewProps {
    pub host: String,
    pub report: UploadReport,
}

#[component]
pub fn UploadReportView(props: &UploadReportViewProps) -> impl Into<AnyElement<'static>> {
    let summary = format!(
        "{} uploaded ({}), {} skipped",
        props.report.uploaded(),
        format_size(props.report.total_bytes()),
        props.report.skipped()
    );
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(content: "┌ ")
                View(background_color: Color::Blue) {
                    Text(content: &props.host, color: Color::White)
                }
            }
            #(props.report.outcomes.clone().into_iter().map(|(name, outcome)| {
                element! {
                    FileOutcomeRow(name: name, outcome: Some(outcome))
                }
            }))
            View(flex_direction: FlexDirection::Row) {
                Text(content: "└ ")
                Text(content: summary)
            }
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(background_color: Color::Blue) {
                Text(content: " sitepush configuration ", color: Color::White, weight: Weight::Bold)
            }
            Text(content: "Settings are written to the config file; secrets go to the OS keyring.")
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(weight: Weight::Bold, content: &props.prompt)
                #(props.default.as_ref().map(|default| element! {
                    Text(content: format!(" [{}]", default))
                }))
            }
            #(props.description.as_ref().map(|description| element! {
                Text(color: Color::DarkGrey, content: description)
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct ErrorMessageProps {
    pub message: String,
}

#[component]
pub fn ErrorMessage(props: &ErrorMessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "▲ ")
            Text(content: &props.message)
        }
    }
}

#[derive(Default, Props)]
pub struct SuccessMessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &SuccessMessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: &props.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_picks_the_right_unit() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn format_size_promotes_at_unit_boundaries() {
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1_048_570), "1.0 MiB");
        assert_eq!(format_size(1024 * 1024 - 1), "1.0 MiB");
        assert_eq!(format_size(1024 * 1024 * 1024 - 1), "1.0 GiB");
    }
}
