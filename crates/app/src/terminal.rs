//! Line-oriented driver that runs one quiz session on stdin/stdout.

use std::io::Write;

use quiz_core::model::{AnswerKey, Question, QuestionKind, ScenarioNode, SubmittedAnswer};
use services::{
    InterruptHub, InterruptSignal, QuizSession, QuizSessionService, SaveStatus, SessionError,
    SubmissionOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

struct Input {
    lines: Lines<BufReader<Stdin>>,
}

impl Input {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// `None` at end of input.
    async fn prompt(&mut self, label: &str) -> std::io::Result<Option<String>> {
        print!("{label}");
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?.map(|line| line.trim().to_string()))
    }
}

fn print_help() {
    println!("Answer with option numbers:");
    println!("  single choice  2");
    println!("  multi select   1,3");
    println!("  ordering       3 1 2   (options in the order you think is right)");
    println!("  scenario       go      (walk the decisions one at a time)");
    println!("Commands: :back  :next  :submit  :hide  :abandon  :quit  :help");
}

fn print_question(session: &QuizSession, question: &Question) {
    let progress = session.progress();
    println!();
    println!(
        "Question {}/{} ({} answered)",
        progress.cursor + 1,
        progress.total,
        progress.answered
    );
    if !question.prompt.is_empty() {
        println!("{}", question.prompt);
    }
    for (i, option) in question.options.iter().enumerate() {
        println!("  {}. {option}", i + 1);
    }
    if let Some(existing) = session.attempt().answer_for(&question.id) {
        println!("  (current answer: {existing:?})");
    }
}

fn print_outcome(outcome: &SubmissionOutcome) {
    println!();
    println!(
        "Score: {}% ({} of {} correct)",
        outcome.score.percentage(),
        outcome.score.correct_count(),
        outcome.score.total_count()
    );
    println!("{}", outcome.feedback.headline);
    println!("{}", outcome.feedback.detail);
    if !outcome.remediation.is_empty() {
        println!("Suggested review:");
        for suggestion in &outcome.remediation {
            match suggestion.start_time_secs {
                Some(at) => println!(
                    "  - {} (~{} min, from {}:{:02})",
                    suggestion.title,
                    suggestion.estimated_minutes,
                    at / 60,
                    at % 60
                ),
                None => println!("  - {} (~{} min)", suggestion.title, suggestion.estimated_minutes),
            }
        }
    }
    if let Some(event) = &outcome.completion {
        println!("+{} XP", event.xp_earned);
    }
}

/// Parse 1-based option numbers separated by commas or whitespace.
fn parse_positions(input: &str) -> Option<Vec<usize>> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<usize>().ok()?.checked_sub(1))
        .collect()
}

fn parse_answer(kind: QuestionKind, input: &str) -> Option<SubmittedAnswer> {
    let positions = parse_positions(input)?;
    match kind {
        QuestionKind::SingleChoice => match positions.as_slice() {
            [single] => Some(SubmittedAnswer::SingleChoice(*single)),
            _ => None,
        },
        QuestionKind::MultiSelect => Some(SubmittedAnswer::MultiSelect(positions)),
        QuestionKind::Ordering => Some(SubmittedAnswer::Ordering(positions)),
        QuestionKind::ScenarioPath => Some(SubmittedAnswer::ScenarioPath(positions)),
    }
}

/// Walk a scenario tree one decision at a time.
async fn walk_scenario(input: &mut Input, root: &ScenarioNode) -> std::io::Result<Option<Vec<usize>>> {
    let mut path = Vec::new();
    let mut node = root;
    while let ScenarioNode::Decision { prompt, choices } = node {
        println!("{prompt}");
        for (i, choice) in choices.iter().enumerate() {
            println!("  {}. {}", i + 1, choice.label);
        }
        let Some(line) = input.prompt("choice> ").await? else {
            return Ok(None);
        };
        let Some(choice) = line
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .filter(|i| *i < choices.len())
        else {
            println!("pick a number between 1 and {}", choices.len());
            continue;
        };
        path.push(choice);
        node = &choices[choice].next;
    }
    Ok(Some(path))
}

fn report(err: &SessionError) {
    println!("! {err}");
}

fn report_save_status(session: &QuizSession) {
    if let SaveStatus::Failed { reason } = session.save_status() {
        println!("(progress not saved yet: {reason})");
    }
}

/// Run `session` until the learner quits or runs out of attempts.
///
/// # Errors
///
/// Returns I/O errors from the terminal and persistence errors from the final
/// flush.
pub async fn drive(
    service: &QuizSessionService,
    hub: &InterruptHub,
    mut session: QuizSession,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut input = Input::new();
    if session.is_resumed() {
        println!(
            "Resuming attempt {} at question {}.",
            session.attempt_number(),
            session.progress().cursor + 1
        );
    } else {
        println!("Starting attempt {}.", session.attempt_number());
    }
    print_help();

    loop {
        if session.is_submitted() {
            if let Some(outcome) = session.last_submission() {
                print_outcome(outcome);
            }
            let retry = session.remaining_attempts().has_any()
                && !session.last_submission().is_some_and(|o| o.score.passed())
                && matches!(
                    input.prompt("Try again? [y/N] ").await?.as_deref(),
                    Some("y" | "Y" | "yes")
                );
            if !retry {
                service.close(session).await?;
                return Ok(());
            }
            if let Err(err) = service.retry(&mut session).await {
                report(&err);
                if let Err(err) = service.close(session).await {
                    report(&err);
                }
                return Ok(());
            }
            println!("Starting attempt {}.", session.attempt_number());
            continue;
        }

        let Some(question) = session.current_question().cloned() else {
            // Nothing left to show; an empty quiz goes straight to scoring.
            if let Err(err) = service.submit(&mut session).await {
                report(&err);
            }
            continue;
        };
        print_question(&session, &question);

        let Some(line) = input.prompt("> ").await? else {
            hub.raise(InterruptSignal::Unload).await;
            service.close(session).await?;
            return Ok(());
        };

        let result = match line.as_str() {
            "" => Ok(()),
            ":help" => {
                print_help();
                Ok(())
            }
            ":back" => service.retreat(&mut session).await.map(|_| ()),
            ":next" => service.advance(&mut session).await.map(|_| ()),
            ":submit" => service.submit(&mut session).await.map(|_| ()),
            ":hide" => {
                hub.raise(InterruptSignal::Hidden).await;
                Ok(())
            }
            ":abandon" => {
                service.abandon(session).await?;
                println!("Attempt abandoned; saved progress removed.");
                return Ok(());
            }
            ":quit" => {
                hub.raise(InterruptSignal::Unload).await;
                service.close(session).await?;
                return Ok(());
            }
            raw => {
                let answer = match &question.key {
                    AnswerKey::ScenarioPath { scenario } if raw == "go" => {
                        walk_scenario(&mut input, &scenario.root)
                            .await?
                            .map(SubmittedAnswer::ScenarioPath)
                    }
                    _ => parse_answer(question.kind(), raw),
                };
                let captured = match answer {
                    Some(SubmittedAnswer::Ordering(arranged)) => {
                        // Options are shown in their original order.
                        let display: Vec<usize> = (0..question.options.len()).collect();
                        service
                            .capture_ordering(&mut session, &question.id, &display, &arranged)
                            .await
                            .map(|()| true)
                    }
                    Some(answer) => service
                        .capture_answer(&mut session, &question.id, answer)
                        .await
                        .map(|()| true),
                    None => {
                        println!("could not read that answer; try :help");
                        Ok(false)
                    }
                };
                match captured {
                    Ok(true) => service.advance(&mut session).await.map(|_| ()),
                    Ok(false) => Ok(()),
                    Err(err) => Err(err),
                }
            }
        };

        if let Err(err) = result {
            report(&err);
        }
        report_save_status(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based_and_flexibly_separated() {
        assert_eq!(parse_positions("1, 3"), Some(vec![0, 2]));
        assert_eq!(parse_positions("3 1 2"), Some(vec![2, 0, 1]));
        assert_eq!(parse_positions("0"), None);
        assert_eq!(parse_positions("x"), None);
    }

    #[test]
    fn answers_follow_question_kind() {
        assert_eq!(
            parse_answer(QuestionKind::SingleChoice, "2"),
            Some(SubmittedAnswer::SingleChoice(1))
        );
        assert_eq!(parse_answer(QuestionKind::SingleChoice, "1,2"), None);
        assert_eq!(
            parse_answer(QuestionKind::MultiSelect, "1,3"),
            Some(SubmittedAnswer::MultiSelect(vec![0, 2]))
        );
        assert_eq!(
            parse_answer(QuestionKind::Ordering, "2 3 1"),
            Some(SubmittedAnswer::Ordering(vec![1, 2, 0]))
        );
    }
}
