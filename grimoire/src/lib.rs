//! Task list and trivia bank engine driven one line of text at a time.
//! The core stays free of terminal I/O: persistence plugs in through
//! `storage::Storage`, presentation through the `format` renderers, and the
//! `session` module ties both to the command parser.

pub mod error {
    //! Every failure the engine can surface, as one flat enumeration.

    /// Failure kinds with their fixed human-readable messages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
    pub enum ErrorKind {
        #[error("A task needs a description")]
        EmptyDescription,
        #[error("A deadline needs a due date, e.g. `deadline return book /by 2/12/2019 1800`")]
        MissingDue,
        #[error("An event needs a start, e.g. `event meeting /from 2025-01-01 0900 /to 2025-01-01 1000`")]
        MissingStart,
        #[error("An event needs an end, e.g. `event meeting /from 2025-01-01 0900 /to 2025-01-01 1000`")]
        MissingEnd,
        #[error("Which task? Give at least one task number")]
        MissingIndex,
        #[error("Task numbers must be whole numbers")]
        InvalidIndex,
        #[error("There is no task at that position in your list")]
        IndexOutOfRange,
        #[error("I don't know that command (type `help` for the list)")]
        UnknownCommand,
        #[error("Give me a keyword to search for")]
        EmptyKeyword,
        #[error("The current trivia category is empty")]
        EmptyBank,
        #[error("There is no trivia question at that position")]
        InvalidBankIndex,
        #[error("No quiz is running; start one with `trivia start`")]
        NotInQuizMode,
        #[error("A trivia category needs a name")]
        EmptyCategoryName,
        #[error("Category names cannot contain path separators, `..` or ` | `")]
        InvalidCategoryName,
        #[error("A trivia question needs a question and an answer, e.g. `trivia add 2+2? /answer 4`")]
        MissingAnswer,
        #[error("Text cannot contain ` | `, begin with `| ` or end with ` |`")]
        ReservedSeparator,
        #[error("That trivia category already exists")]
        CategoryAlreadyExists,
        #[error("No such trivia category")]
        CategoryNotFound,
        #[error("Could not read saved data")]
        StorageUnreadable,
        #[error("Could not save data")]
        StorageUnwritable,
        #[error("Saved data is corrupted")]
        CorruptedRecord,
    }

    /// An [`ErrorKind`] optionally annotated with the value or path it concerns.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("{kind}{}", suffix(.context))]
    pub struct Error {
        kind: ErrorKind,
        context: Option<String>,
    }

    fn suffix(context: &Option<String>) -> String {
        match context {
            Some(text) if !text.is_empty() => format!(": {text}"),
            _ => String::new(),
        }
    }

    impl Error {
        pub fn new(kind: ErrorKind) -> Self {
            Self {
                kind,
                context: None,
            }
        }

        pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
            Self {
                kind,
                context: Some(context.into()),
            }
        }

        pub fn kind(&self) -> ErrorKind {
            self.kind
        }

        pub fn context(&self) -> Option<&str> {
            self.context.as_deref()
        }
    }

    impl From<ErrorKind> for Error {
        fn from(kind: ErrorKind) -> Self {
            Self::new(kind)
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn context_is_appended_after_the_fixed_message() {
            let bare = Error::new(ErrorKind::CategoryNotFound);
            let annotated = Error::with_context(ErrorKind::CategoryNotFound, "history");
            assert_eq!(bare.to_string(), "No such trivia category");
            assert_eq!(annotated.to_string(), "No such trivia category: history");
            assert_eq!(annotated.kind(), ErrorKind::CategoryNotFound);
            assert_eq!(annotated.context(), Some("history"));
        }

        #[test]
        fn empty_context_renders_like_no_context() {
            let err = Error::with_context(ErrorKind::EmptyBank, "");
            assert_eq!(err.to_string(), ErrorKind::EmptyBank.to_string());
        }
    }
}

pub mod core {
    //! Collection model: tasks, the task list, trivia items and banks.

    use crate::error::{Error, ErrorKind, Result};
    use crate::records;
    use chrono::{NaiveDateTime, Timelike};
    use serde::Serialize;
    use std::{collections::BTreeSet, fmt};

    /* ------------------------------- Dates ------------------------------- */

    const DISPLAY_FORMAT: &str = "%b %d %Y, %-I:%M%p";
    const RECORD_FORMAT: &str = "%Y-%m-%dT%H:%M";
    const RECORD_FORMAT_SECONDS: &str = "%Y-%m-%dT%H:%M:%S";

    /// A timestamp that was recognised, or the text it was given as.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "kind", content = "value", rename_all = "snake_case")]
    pub enum DateOrText {
        Resolved(NaiveDateTime),
        Unresolved(String),
    }

    impl DateOrText {
        pub fn is_resolved(&self) -> bool {
            matches!(self, Self::Resolved(_))
        }

        pub fn as_datetime(&self) -> Option<NaiveDateTime> {
            match self {
                Self::Resolved(dt) => Some(*dt),
                Self::Unresolved(_) => None,
            }
        }

        /// Text written to the task file: ISO-8601 for resolved values, the
        /// text as given otherwise.
        pub fn to_record(&self) -> String {
            match self {
                Self::Resolved(dt) if dt.second() == 0 => dt.format(RECORD_FORMAT).to_string(),
                Self::Resolved(dt) => dt.format(RECORD_FORMAT_SECONDS).to_string(),
                Self::Unresolved(text) => text.clone(),
            }
        }

        /// Inverse of [`DateOrText::to_record`]. Never fails: text that is not
        /// in the saved timestamp form is kept as is. Input normalization
        /// resolves that form too, so unresolved text never looks like it.
        pub fn from_record(text: &str) -> Self {
            crate::dates::parse_record(text)
                .map(Self::Resolved)
                .unwrap_or_else(|| Self::Unresolved(text.to_string()))
        }
    }

    impl fmt::Display for DateOrText {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Resolved(dt) => write!(f, "{}", dt.format(DISPLAY_FORMAT)),
                Self::Unresolved(text) => f.write_str(text),
            }
        }
    }

    /* ------------------------------- Tasks ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TaskType {
        Todo,
        Deadline,
        Event,
    }

    impl TaskType {
        pub fn tag(self) -> char {
            match self {
                Self::Todo => 'T',
                Self::Deadline => 'D',
                Self::Event => 'E',
            }
        }

        pub fn from_tag(tag: &str) -> Option<Self> {
            match tag {
                "T" => Some(Self::Todo),
                "D" => Some(Self::Deadline),
                "E" => Some(Self::Event),
                _ => None,
            }
        }

        /// Number of date fields a task of this type carries.
        pub fn date_fields(self) -> usize {
            match self {
                Self::Todo => 0,
                Self::Deadline => 1,
                Self::Event => 2,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum TaskKind {
        Todo,
        Deadline { due: DateOrText },
        Event { start: DateOrText, end: DateOrText },
    }

    impl TaskKind {
        pub fn dates(&self) -> Vec<&DateOrText> {
            match self {
                Self::Todo => Vec::new(),
                Self::Deadline { due } => vec![due],
                Self::Event { start, end } => vec![start, end],
            }
        }

        pub fn task_type(&self) -> TaskType {
            match self {
                Self::Todo => TaskType::Todo,
                Self::Deadline { .. } => TaskType::Deadline,
                Self::Event { .. } => TaskType::Event,
            }
        }
    }

    /// A task. The description is fixed at construction; only `done` changes.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Task {
        description: String,
        #[serde(flatten)]
        kind: TaskKind,
        done: bool,
    }

    impl Task {
        pub fn new(description: impl Into<String>, kind: TaskKind) -> Result<Self> {
            let description = description.into();
            if description.trim().is_empty() {
                return Err(ErrorKind::EmptyDescription.into());
            }
            records::check_storable(&description)?;
            for date in kind.dates() {
                if let DateOrText::Unresolved(text) = date {
                    records::check_storable(text)?;
                }
            }
            Ok(Self {
                description,
                kind,
                done: false,
            })
        }

        pub fn todo(description: impl Into<String>) -> Result<Self> {
            Self::new(description, TaskKind::Todo)
        }

        pub fn deadline(description: impl Into<String>, due: DateOrText) -> Result<Self> {
            Self::new(description, TaskKind::Deadline { due })
        }

        pub fn event(
            description: impl Into<String>,
            start: DateOrText,
            end: DateOrText,
        ) -> Result<Self> {
            Self::new(description, TaskKind::Event { start, end })
        }

        pub fn description(&self) -> &str {
            &self.description
        }

        pub fn kind(&self) -> &TaskKind {
            &self.kind
        }

        pub fn task_type(&self) -> TaskType {
            self.kind.task_type()
        }

        pub fn is_done(&self) -> bool {
            self.done
        }

        pub fn mark_done(&mut self) {
            self.done = true;
        }

        pub fn mark_undone(&mut self) {
            self.done = false;
        }

        pub fn status_icon(&self) -> char {
            if self.done { 'X' } else { ' ' }
        }
    }

    impl fmt::Display for Task {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "[{}][{}] {}",
                self.task_type().tag(),
                self.status_icon(),
                self.description
            )?;
            match &self.kind {
                TaskKind::Todo => Ok(()),
                TaskKind::Deadline { due } => write!(f, " (by: {due})"),
                TaskKind::Event { start, end } => write!(f, " (from: {start} to: {end})"),
            }
        }
    }

    /* ------------------------------ Task list ------------------------------ */

    /// Ordered tasks. Indices are 0-based here; batch helpers take the
    /// 1-based positions users type.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct TaskList {
        tasks: Vec<Task>,
    }

    impl TaskList {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn from_tasks(tasks: Vec<Task>) -> Self {
            Self { tasks }
        }

        /// Appends `task` and returns its 1-based position.
        pub fn add(&mut self, task: Task) -> usize {
            self.tasks.push(task);
            self.tasks.len()
        }

        pub fn get(&self, index: usize) -> Option<&Task> {
            self.tasks.get(index)
        }

        pub fn delete(&mut self, index: usize) -> Result<Task> {
            if index >= self.tasks.len() {
                return Err(Error::with_context(
                    ErrorKind::IndexOutOfRange,
                    index.saturating_add(1).to_string(),
                ));
            }
            Ok(self.tasks.remove(index))
        }

        pub fn len(&self) -> usize {
            self.tasks.len()
        }

        pub fn is_empty(&self) -> bool {
            self.tasks.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = &Task> {
            self.tasks.iter()
        }

        pub fn as_slice(&self) -> &[Task] {
            &self.tasks
        }

        /// Tasks whose display text contains `keyword`, ignoring case, paired
        /// with their 1-based positions.
        pub fn find(&self, keyword: &str) -> Vec<(usize, &Task)> {
            let needle = keyword.to_lowercase();
            self.tasks
                .iter()
                .enumerate()
                .filter(|(_, task)| task.to_string().to_lowercase().contains(&needle))
                .map(|(index, task)| (index + 1, task))
                .collect()
        }

        /// Validates every position against the current length before
        /// anything is touched. Duplicates collapse onto their first occurrence.
        pub fn resolve_positions(&self, positions: &[i64]) -> Result<Vec<usize>> {
            if positions.is_empty() {
                return Err(ErrorKind::MissingIndex.into());
            }
            let mut seen = BTreeSet::new();
            let mut indices = Vec::with_capacity(positions.len());
            for &position in positions {
                let index = usize::try_from(position)
                    .ok()
                    .and_then(|p| p.checked_sub(1))
                    .filter(|&i| i < self.tasks.len())
                    .ok_or_else(|| {
                        Error::with_context(ErrorKind::IndexOutOfRange, position.to_string())
                    })?;
                if seen.insert(index) {
                    indices.push(index);
                }
            }
            Ok(indices)
        }

        pub fn mark(&mut self, positions: &[i64]) -> Result<Vec<Task>> {
            self.set_done(positions, true)
        }

        pub fn unmark(&mut self, positions: &[i64]) -> Result<Vec<Task>> {
            self.set_done(positions, false)
        }

        fn set_done(&mut self, positions: &[i64], done: bool) -> Result<Vec<Task>> {
            let indices = self.resolve_positions(positions)?;
            Ok(indices
                .into_iter()
                .map(|index| {
                    let task = &mut self.tasks[index];
                    if done {
                        task.mark_done();
                    } else {
                        task.mark_undone();
                    }
                    task.clone()
                })
                .collect())
        }

        /// Removes every addressed task, or none of them. Returned in
        /// ascending position order.
        pub fn delete_positions(&mut self, positions: &[i64]) -> Result<Vec<Task>> {
            let mut indices = self.resolve_positions(positions)?;
            indices.sort_unstable();
            let mut removed: Vec<Task> = indices
                .iter()
                .rev()
                .map(|&index| self.tasks.remove(index))
                .collect();
            removed.reverse();
            Ok(removed)
        }
    }

    /* ------------------------------- Trivia ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct TriviaItem {
        question: String,
        answer: String,
    }

    impl TriviaItem {
        pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Result<Self> {
            let question = question.into().trim().to_string();
            let answer = answer.into().trim().to_string();
            if question.is_empty() || answer.is_empty() {
                return Err(ErrorKind::MissingAnswer.into());
            }
            records::check_storable(&question)?;
            records::check_storable(&answer)?;
            Ok(Self { question, answer })
        }

        pub fn question(&self) -> &str {
            &self.question
        }

        pub fn answer(&self) -> &str {
            &self.answer
        }

        /// Case-insensitive comparison, ignoring surrounding whitespace.
        pub fn is_correct(&self, attempt: &str) -> bool {
            attempt.trim().to_lowercase() == self.answer.to_lowercase()
        }
    }

    impl fmt::Display for TriviaItem {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} (answer: {})", self.question, self.answer)
        }
    }

    /// Questions of one category, in the order they were added.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct TriviaBank {
        items: Vec<TriviaItem>,
    }

    impl TriviaBank {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn from_items(items: Vec<TriviaItem>) -> Self {
            Self { items }
        }

        pub fn add(&mut self, item: TriviaItem) -> usize {
            self.items.push(item);
            self.items.len()
        }

        pub fn get(&self, index: usize) -> Option<&TriviaItem> {
            self.items.get(index)
        }

        pub fn delete(&mut self, index: usize) -> Result<TriviaItem> {
            if index >= self.items.len() {
                return Err(Error::with_context(
                    ErrorKind::InvalidBankIndex,
                    index.saturating_add(1).to_string(),
                ));
            }
            Ok(self.items.remove(index))
        }

        /// Same as [`TriviaBank::delete`] for a 1-based position.
        pub fn delete_position(&mut self, position: i64) -> Result<TriviaItem> {
            match usize::try_from(position).ok().and_then(|p| p.checked_sub(1)) {
                Some(index) => self.delete(index),
                None => Err(Error::with_context(
                    ErrorKind::InvalidBankIndex,
                    position.to_string(),
                )),
            }
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }

        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = &TriviaItem> {
            self.items.iter()
        }

        /// Removes and returns a uniformly chosen item; `None` once exhausted.
        pub fn draw_random(&mut self, rng: &mut fastrand::Rng) -> Option<TriviaItem> {
            if self.items.is_empty() {
                return None;
            }
            let index = rng.usize(..self.items.len());
            Some(self.items.remove(index))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::NaiveDate;

        fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateOrText {
            DateOrText::Resolved(
                NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, min, 0)
                    .unwrap(),
            )
        }

        fn list_of(names: &[&str]) -> TaskList {
            TaskList::from_tasks(names.iter().map(|n| Task::todo(*n).unwrap()).collect())
        }

        #[test]
        fn display_matches_status_and_type_tags() {
            let mut todo = Task::todo("buy milk").unwrap();
            assert_eq!(todo.to_string(), "[T][ ] buy milk");
            todo.mark_done();
            assert_eq!(todo.to_string(), "[T][X] buy milk");

            let deadline = Task::deadline("report", at(2019, 12, 2, 18, 0)).unwrap();
            assert_eq!(deadline.to_string(), "[D][ ] report (by: Dec 02 2019, 6:00PM)");

            let event = Task::event(
                "party",
                DateOrText::Unresolved("tonight".into()),
                DateOrText::Unresolved("late".into()),
            )
            .unwrap();
            assert_eq!(event.to_string(), "[E][ ] party (from: tonight to: late)");
        }

        #[test]
        fn blank_description_is_rejected() {
            let err = Task::todo("   ").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EmptyDescription);
        }

        #[test]
        fn add_returns_position_and_get_is_total() {
            let mut list = TaskList::new();
            for (i, name) in ["a", "b", "c"].iter().enumerate() {
                assert_eq!(list.add(Task::todo(*name).unwrap()), i + 1);
            }
            assert_eq!(list.len(), 3);
            assert_eq!(list.get(1).map(Task::description), Some("b"));
            assert!(list.get(3).is_none());
        }

        #[test]
        fn delete_out_of_range_fails_without_removing() {
            let mut list = list_of(&["a", "b"]);
            let err = list.delete(4).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
            assert_eq!(list.len(), 2);
            assert_eq!(list.delete(0).unwrap().description(), "a");
        }

        #[test]
        fn largest_index_reports_without_overflow() {
            let mut list = list_of(&["a"]);
            let err = list.delete(usize::MAX).expect_err("out of range");
            assert_eq!(err.context(), Some(usize::MAX.to_string().as_str()));
            let mut bank = TriviaBank::new();
            let err = bank.delete(usize::MAX).expect_err("out of range");
            assert_eq!(err.kind(), ErrorKind::InvalidBankIndex);
        }

        #[test]
        fn find_is_case_insensitive_and_keeps_positions() {
            let list = list_of(&["Buy milk", "read book", "buy BREAD"]);
            let found: Vec<(usize, &str)> = list
                .find("BUY")
                .into_iter()
                .map(|(pos, task)| (pos, task.description()))
                .collect();
            assert_eq!(found, vec![(1, "Buy milk"), (3, "buy BREAD")]);
            assert!(list.find("zebra").is_empty());
        }

        #[test]
        fn mark_is_idempotent() {
            let mut list = list_of(&["a"]);
            list.mark(&[1]).unwrap();
            list.mark(&[1]).unwrap();
            assert!(list.get(0).unwrap().is_done());
        }

        #[test]
        fn batch_with_one_bad_position_touches_nothing() {
            let mut list = list_of(&["a", "b", "c"]);
            let err = list.mark(&[1, 7]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
            assert_eq!(err.context(), Some("7"));
            assert!(list.iter().all(|t| !t.is_done()));

            let err = list.delete_positions(&[2, 0]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
            assert_eq!(list.len(), 3);
        }

        #[test]
        fn delete_positions_handles_unsorted_and_duplicate_input() {
            let mut list = list_of(&["a", "b", "c", "d"]);
            let removed = list.delete_positions(&[3, 1, 3]).unwrap();
            let names: Vec<&str> = removed.iter().map(Task::description).collect();
            assert_eq!(names, vec!["a", "c"]);
            let left: Vec<&str> = list.iter().map(Task::description).collect();
            assert_eq!(left, vec!["b", "d"]);
        }

        #[test]
        fn empty_position_list_is_missing_index() {
            let list = list_of(&["a"]);
            assert_eq!(
                list.resolve_positions(&[]).unwrap_err().kind(),
                ErrorKind::MissingIndex
            );
        }

        #[test]
        fn record_form_of_dates_round_trips() {
            let resolved = at(2025, 12, 25, 0, 0);
            assert_eq!(resolved.to_record(), "2025-12-25T00:00");
            assert_eq!(DateOrText::from_record("2025-12-25T00:00"), resolved);

            let text = DateOrText::from_record("next tuesday-ish");
            assert_eq!(text, DateOrText::Unresolved("next tuesday-ish".into()));
            assert_eq!(text.to_record(), "next tuesday-ish");
        }

        #[test]
        fn trivia_answers_compare_without_case() {
            let item = TriviaItem::new("Capital of France?", "Paris").unwrap();
            assert!(item.is_correct("  paris "));
            assert!(!item.is_correct("Lyon"));
            assert_eq!(
                TriviaItem::new("q", " ").unwrap_err().kind(),
                ErrorKind::MissingAnswer
            );
        }

        #[test]
        fn drawing_samples_without_replacement() {
            let mut bank = TriviaBank::from_items(vec![
                TriviaItem::new("1", "a").unwrap(),
                TriviaItem::new("2", "b").unwrap(),
                TriviaItem::new("3", "c").unwrap(),
            ]);
            let mut rng = fastrand::Rng::with_seed(7);
            let mut drawn: Vec<String> = std::iter::from_fn(|| bank.draw_random(&mut rng))
                .map(|item| item.question().to_string())
                .collect();
            drawn.sort();
            assert_eq!(drawn, vec!["1", "2", "3"]);
            assert!(bank.is_empty());
            assert!(bank.draw_random(&mut rng).is_none());
        }

        #[test]
        fn bank_positions_are_one_based() {
            let mut bank = TriviaBank::from_items(vec![TriviaItem::new("q", "a").unwrap()]);
            assert_eq!(
                bank.delete_position(0).unwrap_err().kind(),
                ErrorKind::InvalidBankIndex
            );
            assert_eq!(
                bank.delete_position(2).unwrap_err().kind(),
                ErrorKind::InvalidBankIndex
            );
            assert_eq!(bank.delete_position(1).unwrap().question(), "q");
        }
    }
}

pub mod dates {
    //! Free-text timestamp recognition.
    //!
    //! Accepted shapes are tried in a fixed order; the first that consumes the
    //! whole input wins. Anything else is kept verbatim as
    //! [`DateOrText::Unresolved`], which is not an error.

    use crate::core::DateOrText;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use nom::{
        IResult,
        bytes::complete::take_while_m_n,
        character::complete::char,
        combinator::{all_consuming, map_res, opt},
        error::VerboseError,
        sequence::{preceded, tuple},
    };
    use std::fmt;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// One accepted timestamp shape.
    #[derive(Clone, Copy)]
    pub struct DateFormat {
        pattern: &'static str,
        matcher: fn(&str) -> Option<NaiveDateTime>,
    }

    impl DateFormat {
        pub const fn new(pattern: &'static str, matcher: fn(&str) -> Option<NaiveDateTime>) -> Self {
            Self { pattern, matcher }
        }

        pub fn pattern(&self) -> &'static str {
            self.pattern
        }

        pub fn apply(&self, text: &str) -> Option<NaiveDateTime> {
            (self.matcher)(text)
        }
    }

    impl fmt::Debug for DateFormat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_tuple("DateFormat").field(&self.pattern).finish()
        }
    }

    pub const DAY_MONTH_YEAR_TIME: DateFormat = DateFormat::new("d/M/yyyy HHmm", match_dmy_time);
    pub const YEAR_MONTH_DAY_TIME: DateFormat = DateFormat::new("yyyy-MM-dd HHmm", match_ymd_time);
    pub const DAY_MONTH_YEAR: DateFormat = DateFormat::new("d/M/yyyy", match_dmy);
    pub const YEAR_MONTH_DAY: DateFormat = DateFormat::new("yyyy-MM-dd", match_ymd);
    /// The form resolved timestamps are saved in.
    pub const RECORD: DateFormat = DateFormat::new("yyyy-MM-ddTHH:mm[:ss]", parse_record);

    #[derive(Debug, Clone)]
    pub struct DateNormalizer {
        formats: Vec<DateFormat>,
    }

    impl Default for DateNormalizer {
        fn default() -> Self {
            Self {
                formats: vec![
                    DAY_MONTH_YEAR_TIME,
                    YEAR_MONTH_DAY_TIME,
                    DAY_MONTH_YEAR,
                    YEAR_MONTH_DAY,
                    RECORD,
                ],
            }
        }
    }

    impl DateNormalizer {
        pub fn new() -> Self {
            Self::default()
        }

        /// Appends a format tried after the existing ones.
        pub fn with_format(mut self, format: DateFormat) -> Self {
            self.formats.push(format);
            self
        }

        pub fn formats(&self) -> &[DateFormat] {
            &self.formats
        }

        pub fn normalize(&self, text: &str) -> DateOrText {
            let text = text.trim();
            self.formats
                .iter()
                .find_map(|format| format.apply(text))
                .map(DateOrText::Resolved)
                .unwrap_or_else(|| DateOrText::Unresolved(text.to_string()))
        }

        /// Normalizes text typed by the user; the flag is set when the text
        /// looked like a date but matched no format.
        pub fn normalize_input(&self, text: &str) -> (DateOrText, bool) {
            let value = self.normalize(text);
            let warn = !value.is_resolved() && looks_like_date(text);
            (value, warn)
        }
    }

    pub fn looks_like_date(text: &str) -> bool {
        text.chars().any(|c| c.is_ascii_digit()) && (text.contains('/') || text.contains('-'))
    }

    /* ------------------------------ Matchers ------------------------------ */

    fn match_dmy_time(text: &str) -> Option<NaiveDateTime> {
        all_consuming(tuple((slash_date, char(' '), clock)))(text)
            .ok()
            .map(|(_, (date, _, time))| date.and_time(time))
    }

    fn match_ymd_time(text: &str) -> Option<NaiveDateTime> {
        all_consuming(tuple((dash_date, char(' '), clock)))(text)
            .ok()
            .map(|(_, (date, _, time))| date.and_time(time))
    }

    fn match_dmy(text: &str) -> Option<NaiveDateTime> {
        all_consuming(slash_date)(text)
            .ok()
            .and_then(|(_, date)| date.and_hms_opt(0, 0, 0))
    }

    fn match_ymd(text: &str) -> Option<NaiveDateTime> {
        all_consuming(dash_date)(text)
            .ok()
            .and_then(|(_, date)| date.and_hms_opt(0, 0, 0))
    }

    /// Strict `yyyy-MM-ddTHH:mm[:ss]`, as written by [`DateOrText::to_record`].
    pub fn parse_record(text: &str) -> Option<NaiveDateTime> {
        let seconds = opt(preceded(char(':'), number(2, 2)));
        let time = map_res(
            tuple((number(2, 2), char(':'), number(2, 2), seconds)),
            |(h, _, m, s)| NaiveTime::from_hms_opt(h, m, s.unwrap_or(0)).ok_or("invalid time"),
        );
        all_consuming(tuple((dash_date, char('T'), time)))(text)
            .ok()
            .map(|(_, (date, _, time))| date.and_time(time))
    }

    fn slash_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((number(1, 2), char('/'), number(1, 2), char('/'), number(4, 4))),
            |(d, _, m, _, y)| NaiveDate::from_ymd_opt(y as i32, m, d).ok_or("invalid date"),
        )(i)
    }

    fn dash_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((number(4, 4), char('-'), number(2, 2), char('-'), number(2, 2))),
            |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y as i32, m, d).ok_or("invalid date"),
        )(i)
    }

    /// `HHmm`, 24-hour.
    fn clock(i: &str) -> PResult<'_, NaiveTime> {
        map_res(tuple((number(2, 2), number(2, 2))), |(h, m)| {
            NaiveTime::from_hms_opt(h, m, 0).ok_or("invalid time")
        })(i)
    }

    fn number(min: usize, max: usize) -> impl Fn(&str) -> PResult<'_, u32> {
        move |i: &str| {
            map_res(
                take_while_m_n(min, max, |c: char| c.is_ascii_digit()),
                |s: &str| s.parse::<u32>(),
            )(i)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn resolved(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateOrText {
            DateOrText::Resolved(
                NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, min, 0)
                    .unwrap(),
            )
        }

        #[test]
        fn all_four_shapes_resolve() {
            let n = DateNormalizer::new();
            assert_eq!(n.normalize("2/12/2019 1800"), resolved(2019, 12, 2, 18, 0));
            assert_eq!(n.normalize("2019-12-02 0730"), resolved(2019, 12, 2, 7, 30));
            assert_eq!(n.normalize("25/12/2025"), resolved(2025, 12, 25, 0, 0));
            assert_eq!(n.normalize("2025-12-25"), resolved(2025, 12, 25, 0, 0));
        }

        #[test]
        fn whole_input_must_match() {
            let n = DateNormalizer::new();
            assert_eq!(
                n.normalize("2025-12-25 evening"),
                DateOrText::Unresolved("2025-12-25 evening".into())
            );
            assert!(!n.normalize("2025-1-5").is_resolved());
            assert!(!n.normalize("12/25/20255").is_resolved());
        }

        #[test]
        fn calendar_invalid_values_stay_text() {
            let n = DateNormalizer::new();
            assert!(!n.normalize("31/2/2024").is_resolved());
            assert!(!n.normalize("2024-01-01 2500").is_resolved());
        }

        #[test]
        fn warning_only_for_date_like_text() {
            let n = DateNormalizer::new();
            let (value, warn) = n.normalize_input("not-a-date");
            assert_eq!(value, DateOrText::Unresolved("not-a-date".into()));
            assert!(!warn, "no digit, no warning");

            let (_, warn) = n.normalize_input("32/13/2024");
            assert!(warn);

            let (_, warn) = n.normalize_input("sunday");
            assert!(!warn);

            let (_, warn) = n.normalize_input("1/1/2024");
            assert!(!warn, "resolved values never warn");
        }

        #[test]
        fn saved_form_is_accepted_as_input() {
            let n = DateNormalizer::new();
            let (value, warn) = n.normalize_input("2025-12-25T10:00");
            assert_eq!(value, resolved(2025, 12, 25, 10, 0));
            assert!(!warn);
            assert_eq!(
                parse_record("2025-12-25T10:00:30").map(|dt| dt.to_string()),
                Some("2025-12-25 10:00:30".to_string())
            );
            assert!(parse_record("2025-1-5T1:00").is_none());
            assert!(parse_record("2025-12-25T10:00 ").is_none());
        }

        #[test]
        fn extra_formats_are_tried_last() {
            fn always_epoch(_: &str) -> Option<NaiveDateTime> {
                NaiveDate::from_ymd_opt(1970, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
            let n = DateNormalizer::new().with_format(DateFormat::new("anything", always_epoch));
            assert_eq!(n.formats().len(), 6);
            assert_eq!(n.formats()[5].pattern(), "anything");
            assert_eq!(n.normalize("1/1/2000"), resolved(2000, 1, 1, 0, 0));
            assert_eq!(n.normalize("whenever"), resolved(1970, 1, 1, 0, 0));
        }
    }
}

pub mod command {
    //! Turns one line of input into a [`Command`].
    //!
    //! The first whitespace-delimited word selects the command; the rest is
    //! interpreted per command. Dates are normalized here so that the
    //! session only ever sees typed values.

    use crate::core::DateOrText;
    use crate::dates::DateNormalizer;
    use crate::error::{Error, ErrorKind, Result};
    use crate::records::SEPARATOR;
    use nom::{
        IResult,
        character::complete::{digit1, multispace1, one_of},
        combinator::{all_consuming, map, opt, recognize},
        error::VerboseError,
        multi::separated_list1,
        sequence::pair,
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Command {
        List,
        Mark(Vec<i64>),
        Unmark(Vec<i64>),
        Delete(Vec<i64>),
        Todo {
            description: String,
        },
        Deadline {
            description: String,
            due: DateOrText,
            date_warning: bool,
        },
        Event {
            description: String,
            start: DateOrText,
            end: DateOrText,
            date_warning: bool,
        },
        Find {
            keyword: String,
        },
        Trivia(TriviaCommand),
        Help,
        Bye,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TriviaCommand {
        ListCategories,
        ListItems,
        Add { question: String, answer: String },
        Select { category: String },
        Start,
        Stop,
        Delete(i64),
        DeleteCategory { category: String },
        Create { category: String },
        Help,
    }

    #[derive(Debug, Clone, Default)]
    pub struct CommandParser {
        dates: DateNormalizer,
    }

    impl CommandParser {
        pub fn new(dates: DateNormalizer) -> Self {
            Self { dates }
        }

        pub fn parse(&self, line: &str) -> Result<Command> {
            let (keyword, rest) = split_word(line);
            match keyword {
                "list" => Ok(Command::List),
                "help" => Ok(Command::Help),
                "bye" => Ok(Command::Bye),
                "mark" => Ok(Command::Mark(parse_positions(rest)?)),
                "unmark" => Ok(Command::Unmark(parse_positions(rest)?)),
                "delete" => Ok(Command::Delete(parse_positions(rest)?)),
                "todo" => {
                    let description = rest.ok_or(ErrorKind::EmptyDescription)?;
                    Ok(Command::Todo {
                        description: description.to_string(),
                    })
                }
                "deadline" => self.parse_deadline(rest),
                "event" => self.parse_event(rest),
                "find" => {
                    let keyword = rest.ok_or(ErrorKind::EmptyKeyword)?;
                    Ok(Command::Find {
                        keyword: keyword.to_string(),
                    })
                }
                "trivia" => Ok(Command::Trivia(parse_trivia(rest)?)),
                "" => Err(ErrorKind::UnknownCommand.into()),
                other => Err(Error::with_context(ErrorKind::UnknownCommand, other)),
            }
        }

        fn parse_deadline(&self, rest: Option<&str>) -> Result<Command> {
            let rest = rest.ok_or(ErrorKind::EmptyDescription)?;
            if starts_with_marker(rest, "/by") {
                return Err(ErrorKind::EmptyDescription.into());
            }
            let (description, due) = rest.split_once(" /by ").ok_or(ErrorKind::MissingDue)?;
            let description = non_blank(description).ok_or(ErrorKind::EmptyDescription)?;
            let due = non_blank(due).ok_or(ErrorKind::MissingDue)?;
            let (due, date_warning) = self.dates.normalize_input(due);
            Ok(Command::Deadline {
                description: description.to_string(),
                due,
                date_warning,
            })
        }

        fn parse_event(&self, rest: Option<&str>) -> Result<Command> {
            let rest = rest.ok_or(ErrorKind::EmptyDescription)?;
            if starts_with_marker(rest, "/from") {
                return Err(ErrorKind::EmptyDescription.into());
            }
            let (description, times) = rest
                .split_once(" /from ")
                .ok_or(ErrorKind::MissingStart)?;
            let description = non_blank(description).ok_or(ErrorKind::EmptyDescription)?;
            let times = times.trim_start();
            if starts_with_marker(times, "/to") {
                return Err(ErrorKind::MissingStart.into());
            }
            let (start, end) = times.split_once(" /to ").ok_or(ErrorKind::MissingEnd)?;
            let start = non_blank(start).ok_or(ErrorKind::MissingStart)?;
            let end = non_blank(end).ok_or(ErrorKind::MissingEnd)?;
            let (start, start_warning) = self.dates.normalize_input(start);
            let (end, end_warning) = self.dates.normalize_input(end);
            Ok(Command::Event {
                description: description.to_string(),
                start,
                end,
                date_warning: start_warning || end_warning,
            })
        }
    }

    /// Parses with the default date formats.
    pub fn parse_command(line: &str) -> Result<Command> {
        CommandParser::default().parse(line)
    }

    fn parse_trivia(rest: Option<&str>) -> Result<TriviaCommand> {
        let (sub, arg) = split_word(rest.unwrap_or(""));
        match sub {
            "list" => match arg {
                None => Ok(TriviaCommand::ListCategories),
                Some("all") => Ok(TriviaCommand::ListItems),
                Some(other) => Err(Error::with_context(
                    ErrorKind::UnknownCommand,
                    format!("trivia list {other}"),
                )),
            },
            "add" => {
                let arg = arg.ok_or(ErrorKind::MissingAnswer)?;
                if starts_with_marker(arg, "/answer") {
                    return Err(ErrorKind::MissingAnswer.into());
                }
                let (question, answer) = arg
                    .split_once(" /answer ")
                    .ok_or(ErrorKind::MissingAnswer)?;
                let question = non_blank(question).ok_or(ErrorKind::MissingAnswer)?;
                let answer = non_blank(answer).ok_or(ErrorKind::MissingAnswer)?;
                Ok(TriviaCommand::Add {
                    question: question.to_string(),
                    answer: answer.to_string(),
                })
            }
            "select" => Ok(TriviaCommand::Select {
                category: category_name(arg)?,
            }),
            "create" => Ok(TriviaCommand::Create {
                category: category_name(arg)?,
            }),
            "delete" => {
                let arg = arg.ok_or(ErrorKind::MissingIndex)?;
                match split_word(arg) {
                    ("category", name) => Ok(TriviaCommand::DeleteCategory {
                        category: category_name(name)?,
                    }),
                    _ => all_consuming(signed)(arg)
                        .map(|(_, position)| TriviaCommand::Delete(position))
                        .map_err(|_| Error::with_context(ErrorKind::InvalidIndex, arg)),
                }
            }
            "start" => Ok(TriviaCommand::Start),
            "stop" => Ok(TriviaCommand::Stop),
            "help" => Ok(TriviaCommand::Help),
            "" => Err(Error::with_context(ErrorKind::UnknownCommand, "trivia")),
            other => Err(Error::with_context(
                ErrorKind::UnknownCommand,
                format!("trivia {other}"),
            )),
        }
    }

    /// Checks a trivia category name; returns it trimmed.
    pub fn validate_category_name(name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ErrorKind::EmptyCategoryName.into());
        }
        let unsafe_name = name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.contains(SEPARATOR)
            || name.starts_with('.');
        if unsafe_name {
            return Err(Error::with_context(ErrorKind::InvalidCategoryName, name));
        }
        Ok(name.to_string())
    }

    fn category_name(arg: Option<&str>) -> Result<String> {
        validate_category_name(arg.unwrap_or(""))
    }

    fn parse_positions(rest: Option<&str>) -> Result<Vec<i64>> {
        let rest = rest.ok_or(ErrorKind::MissingIndex)?;
        all_consuming(separated_list1(multispace1, signed))(rest)
            .map(|(_, positions)| positions)
            .map_err(|_| {
                let offending = rest
                    .split_whitespace()
                    .find(|token| token.parse::<i64>().is_err())
                    .unwrap_or(rest);
                Error::with_context(ErrorKind::InvalidIndex, offending)
            })
    }

    /// Saturates on overflow so huge positions fail the range check instead.
    fn signed(i: &str) -> PResult<'_, i64> {
        map(recognize(pair(opt(one_of("+-")), digit1)), |s: &str| {
            s.parse::<i64>()
                .unwrap_or(if s.starts_with('-') { i64::MIN } else { i64::MAX })
        })(i)
    }

    /// Splits off the first word. The remainder is trimmed and `None` when blank.
    fn split_word(line: &str) -> (&str, Option<&str>) {
        let line = line.trim();
        match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, non_blank(rest)),
            None => (line, None),
        }
    }

    fn non_blank(text: &str) -> Option<&str> {
        let text = text.trim();
        (!text.is_empty()).then_some(text)
    }

    fn starts_with_marker(text: &str, marker: &str) -> bool {
        text.strip_prefix(marker)
            .is_some_and(|after| after.is_empty() || after.starts_with(char::is_whitespace))
    }

}

pub mod records {
    //! Line-per-record text codec for the task and trivia files.
    //!
    //! Tasks: `TYPE | DONE | DESCRIPTION [| DATE [| DATE]]` where TYPE is one of
    //! `T`, `D`, `E` and DONE is `1` or `0`. Trivia: `QUESTION | ANSWER`.

    use crate::core::{DateOrText, Task, TaskKind, TaskType, TriviaBank, TriviaItem};
    use crate::error::{Error, ErrorKind, Result};

    pub const SEPARATOR: &str = " | ";

    /// Rejects text that would split differently once joined with
    /// [`SEPARATOR`]. Tasks and trivia items check every stored field.
    pub fn check_storable(text: &str) -> Result<()> {
        if text.contains(SEPARATOR) || text.starts_with("| ") || text.ends_with(" |") {
            return Err(Error::with_context(ErrorKind::ReservedSeparator, text));
        }
        Ok(())
    }

    pub fn encode_task(task: &Task) -> String {
        let mut fields = vec![
            task.task_type().tag().to_string(),
            if task.is_done() { "1" } else { "0" }.to_string(),
            task.description().to_string(),
        ];
        match task.kind() {
            TaskKind::Todo => {}
            TaskKind::Deadline { due } => fields.push(due.to_record()),
            TaskKind::Event { start, end } => {
                fields.push(start.to_record());
                fields.push(end.to_record());
            }
        }
        fields.join(SEPARATOR)
    }

    pub fn decode_task(line: &str) -> Result<Task> {
        let corrupted = |why: String| Error::with_context(ErrorKind::CorruptedRecord, why);
        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        if fields.len() < 3 {
            return Err(corrupted(format!(
                "expected at least 3 fields, found {}",
                fields.len()
            )));
        }
        let task_type = TaskType::from_tag(fields[0])
            .ok_or_else(|| corrupted(format!("unknown task type `{}`", fields[0])))?;
        let done = match fields[1] {
            "1" => true,
            "0" => false,
            other => return Err(corrupted(format!("bad completion flag `{other}`"))),
        };
        let dates = task_type.date_fields();
        if fields.len() != 3 + dates {
            return Err(corrupted(format!(
                "a `{}` record has {} fields, found {}",
                task_type.tag(),
                3 + dates,
                fields.len()
            )));
        }
        let description = fields[2];
        let date = |offset: usize| DateOrText::from_record(fields[3 + offset]);
        let kind = match task_type {
            TaskType::Todo => TaskKind::Todo,
            TaskType::Deadline => TaskKind::Deadline { due: date(0) },
            TaskType::Event => TaskKind::Event {
                start: date(0),
                end: date(1),
            },
        };
        let mut task = Task::new(description, kind).map_err(|err| corrupted(err.to_string()))?;
        if done {
            task.mark_done();
        }
        Ok(task)
    }

    pub fn encode_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> String {
        tasks
            .into_iter()
            .map(|task| encode_task(task) + "\n")
            .collect()
    }

    /// Decodes a whole task file, skipping blank lines. The first bad line
    /// aborts with its 1-based line number in the error context.
    pub fn decode_tasks(text: &str) -> Result<Vec<Task>> {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                decode_task(line).map_err(|err| {
                    Error::with_context(
                        ErrorKind::CorruptedRecord,
                        format!("line {}: {}", number + 1, err.context().unwrap_or_default()),
                    )
                })
            })
            .collect()
    }

    pub fn encode_trivia(item: &TriviaItem) -> String {
        format!("{}{SEPARATOR}{}", item.question(), item.answer())
    }

    pub fn decode_trivia(line: &str) -> Option<TriviaItem> {
        let (question, answer) = line.split_once(SEPARATOR)?;
        TriviaItem::new(question, answer).ok()
    }

    pub fn encode_bank(bank: &TriviaBank) -> String {
        bank.iter().map(|item| encode_trivia(item) + "\n").collect()
    }

    /// Decodes a category file. Lines that are not valid records are skipped
    /// and reported by 1-based line number.
    pub fn decode_bank(text: &str) -> (TriviaBank, Vec<usize>) {
        let mut bank = TriviaBank::new();
        let mut skipped = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match decode_trivia(line) {
                Some(item) => {
                    bank.add(item);
                }
                None => skipped.push(number + 1),
            }
        }
        (bank, skipped)
    }

}

pub mod format {
    //! Renders session outcomes and errors as user-facing text.

    use crate::core::{Task, TriviaItem};
    use crate::error::{Error, ErrorKind};

    pub const ERROR_MARKER: &str = "OOPS!!! ";

    pub const DATE_WARNING: &str = "That looks like a date I can't read. Use d/M/yyyy HHmm, \
         yyyy-MM-dd HHmm, d/M/yyyy or yyyy-MM-dd if you want it understood. Saved as text.";

    pub const WELCOME: &str = "Hello, I'm Grimoire.\n\
         I keep your tasks and quiz you on trivia. Type `help` to see what I can do.";

    pub const HELP: &str = "\
Tasks:
  list                                     show every task
  todo <description>                       add a task
  deadline <description> /by <date>        add a task with a due date
  event <description> /from <a> /to <b>    add a task with a time span
  mark <n> [<n>...]                        mark tasks as done
  unmark <n> [<n>...]                      mark tasks as not done
  delete <n> [<n>...]                      remove tasks
  find <keyword>                           search task text
Dates: d/M/yyyy HHmm, yyyy-MM-dd HHmm, d/M/yyyy or yyyy-MM-dd; anything else is kept as text.
Other:
  trivia help                              trivia commands
  help                                     this text
  bye                                      quit";

    pub const TRIVIA_HELP: &str = "\
Trivia:
  trivia list                              show categories
  trivia list all                          show questions in the current category
  trivia add <question> /answer <answer>   add a question
  trivia delete <n>                        remove a question
  trivia select <category>                 switch category
  trivia create <category>                 make an empty category
  trivia delete category <category>        remove a category
  trivia start                             quiz yourself on the current category
  trivia stop                              end the quiz";

    /// Successful result of one handled line.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Outcome {
        Added {
            task: Task,
            total: usize,
            date_warning: bool,
        },
        Listed {
            tasks: Vec<Task>,
        },
        Marked {
            tasks: Vec<Task>,
        },
        Unmarked {
            tasks: Vec<Task>,
        },
        Deleted {
            tasks: Vec<Task>,
            total: usize,
        },
        Found {
            keyword: String,
            matches: Vec<(usize, Task)>,
        },
        Help,
        Goodbye,
        TriviaCategories {
            categories: Vec<String>,
            current: String,
        },
        TriviaItems {
            category: String,
            items: Vec<TriviaItem>,
        },
        TriviaAdded {
            category: String,
            item: TriviaItem,
            total: usize,
        },
        TriviaDeleted {
            category: String,
            item: TriviaItem,
            total: usize,
        },
        CategorySelected {
            category: String,
            total: usize,
        },
        CategoryCreated {
            category: String,
        },
        CategoryDeleted {
            category: String,
            reset_to: Option<String>,
        },
        TriviaHelp,
        QuizStarted {
            category: String,
            question: String,
        },
        QuizStopped,
        Answered {
            correct: bool,
            answer: String,
            next_question: Option<String>,
        },
    }

    pub fn render_error(err: &Error) -> String {
        format!("{ERROR_MARKER}{err}")
    }

    pub fn render(outcome: &Outcome) -> String {
        let mut lines: Vec<String> = Vec::new();
        match outcome {
            Outcome::Added {
                task,
                total,
                date_warning,
            } => {
                if *date_warning {
                    lines.push(format!("{ERROR_MARKER}{DATE_WARNING}"));
                }
                lines.push("Got it. I've added this task:".into());
                lines.push(format!("  {task}"));
                lines.push(task_count(*total));
            }
            Outcome::Listed { tasks } if tasks.is_empty() => {
                lines.push("Your list is empty.".into());
            }
            Outcome::Listed { tasks } => {
                lines.push("Here are the tasks in your list:".into());
                lines.extend(
                    tasks
                        .iter()
                        .enumerate()
                        .map(|(i, task)| format!("{}.{task}", i + 1)),
                );
            }
            Outcome::Marked { tasks } => {
                lines.push("Nice! I've marked these tasks as done:".into());
                lines.extend(tasks.iter().map(|task| format!("  {task}")));
            }
            Outcome::Unmarked { tasks } => {
                lines.push("OK, I've marked these tasks as not done yet:".into());
                lines.extend(tasks.iter().map(|task| format!("  {task}")));
            }
            Outcome::Deleted { tasks, total } => {
                lines.push("Noted. I've removed these tasks:".into());
                lines.extend(tasks.iter().map(|task| format!("  {task}")));
                lines.push(task_count(*total));
            }
            Outcome::Found { keyword, matches } if matches.is_empty() => {
                lines.push(format!("No tasks match \"{keyword}\"."));
            }
            Outcome::Found { matches, .. } => {
                lines.push("Here are the matching tasks in your list:".into());
                lines.extend(matches.iter().map(|(pos, task)| format!("{pos}.{task}")));
            }
            Outcome::Help => lines.push(HELP.into()),
            Outcome::Goodbye => lines.push("Bye. Hope to see you again soon!".into()),
            Outcome::TriviaCategories { categories, .. } if categories.is_empty() => {
                lines.push("There are no trivia categories yet.".into());
            }
            Outcome::TriviaCategories {
                categories,
                current,
            } => {
                lines.push("Trivia categories:".into());
                lines.extend(categories.iter().map(|name| {
                    if name == current {
                        format!("  * {name} (current)")
                    } else {
                        format!("  * {name}")
                    }
                }));
            }
            Outcome::TriviaItems { category, items } if items.is_empty() => {
                lines.push(format!("The \"{category}\" category has no questions yet."));
            }
            Outcome::TriviaItems { category, items } => {
                lines.push(format!("Questions in \"{category}\":"));
                lines.extend(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| format!("{}. {item}", i + 1)),
                );
            }
            Outcome::TriviaAdded {
                category,
                item,
                total,
            } => {
                lines.push(format!("Added to \"{category}\":"));
                lines.push(format!("  {item}"));
                lines.push(question_count(*total));
            }
            Outcome::TriviaDeleted {
                category,
                item,
                total,
            } => {
                lines.push(format!("Removed from \"{category}\":"));
                lines.push(format!("  {item}"));
                lines.push(question_count(*total));
            }
            Outcome::CategorySelected { category, total } => {
                lines.push(format!("Now using the \"{category}\" category."));
                lines.push(question_count(*total));
            }
            Outcome::CategoryCreated { category } => {
                lines.push(format!("Created the \"{category}\" category."));
            }
            Outcome::CategoryDeleted { category, reset_to } => {
                lines.push(format!("Deleted the \"{category}\" category."));
                if let Some(fallback) = reset_to {
                    lines.push(format!("Switched back to the \"{fallback}\" category."));
                }
            }
            Outcome::TriviaHelp => lines.push(TRIVIA_HELP.into()),
            Outcome::QuizStarted { category, question } => {
                lines.push(format!(
                    "Quiz on \"{category}\" started. Type `trivia stop` to finish."
                ));
                lines.push(format!("Question: {question}"));
            }
            Outcome::QuizStopped => lines.push("Quiz stopped. Back to your tasks.".into()),
            Outcome::Answered {
                correct,
                answer,
                next_question,
            } => {
                if *correct {
                    lines.push("Correct!".into());
                } else {
                    lines.push(format!("Not quite. The answer was: {answer}"));
                }
                match next_question {
                    Some(question) => lines.push(format!("Question: {question}")),
                    None => {
                        lines.push(render_error(&Error::new(ErrorKind::EmptyBank)));
                        lines.push("That was the last question. Quiz over.".into());
                    }
                }
            }
        }
        lines.join("\n")
    }

    fn task_count(total: usize) -> String {
        match total {
            1 => "Now you have 1 task in the list.".into(),
            n => format!("Now you have {n} tasks in the list."),
        }
    }

    fn question_count(total: usize) -> String {
        match total {
            1 => "The category holds 1 question.".into(),
            n => format!("The category holds {n} questions."),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn errors_carry_the_marker() {
            let text = render_error(&Error::new(ErrorKind::EmptyKeyword));
            assert!(text.starts_with(ERROR_MARKER));
            assert!(text.ends_with("Give me a keyword to search for"));
        }

        #[test]
        fn added_pluralizes_and_warns_first() {
            let task = Task::todo("read").expect("todo");
            let one = render(&Outcome::Added {
                task: task.clone(),
                total: 1,
                date_warning: false,
            });
            assert_eq!(
                one,
                "Got it. I've added this task:\n  [T][ ] read\nNow you have 1 task in the list."
            );

            let warned = render(&Outcome::Added {
                task,
                total: 2,
                date_warning: true,
            });
            assert!(warned.starts_with(ERROR_MARKER));
            assert!(warned.ends_with("Now you have 2 tasks in the list."));
        }

        #[test]
        fn list_numbers_from_one() {
            let tasks = vec![
                Task::todo("a").expect("a"),
                Task::todo("b").expect("b"),
            ];
            assert_eq!(
                render(&Outcome::Listed { tasks }),
                "Here are the tasks in your list:\n1.[T][ ] a\n2.[T][ ] b"
            );
            assert_eq!(
                render(&Outcome::Listed { tasks: Vec::new() }),
                "Your list is empty."
            );
        }

        #[test]
        fn exhausted_quiz_shows_empty_bank_notice() {
            let text = render(&Outcome::Answered {
                correct: true,
                answer: "4".into(),
                next_question: None,
            });
            assert!(text.starts_with("Correct!"));
            assert!(text.contains(&render_error(&Error::new(ErrorKind::EmptyBank))));
        }
    }
}

pub mod storage {
    //! Persistence seam plus the flat-file and in-memory implementations.

    use crate::core::{Task, TriviaBank};
    use crate::error::{Error, ErrorKind, Result};
    use crate::records;
    use indexmap::IndexMap;
    use log::{debug, info, warn};
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    pub const TASKS_FILE: &str = "tasks.txt";
    pub const TRIVIA_DIR: &str = "trivia";
    const CATEGORY_EXTENSION: &str = "txt";

    /// Loads and saves the task list and trivia categories.
    pub trait Storage {
        /// Missing data loads as an empty list.
        fn load_tasks(&self) -> Result<Vec<Task>>;

        /// Replaces everything previously saved.
        fn save_tasks(&mut self, tasks: &[Task]) -> Result<()>;

        /// Missing categories load as empty banks.
        fn load_trivia(&self, category: &str) -> Result<TriviaBank>;

        fn save_trivia(&mut self, category: &str, bank: &TriviaBank) -> Result<()>;

        /// Category names in a stable order.
        fn list_categories(&self) -> Result<Vec<String>>;

        fn create_category(&mut self, name: &str) -> Result<()>;

        fn delete_category(&mut self, name: &str) -> Result<()>;
    }

    /* --------------------------- Flat files --------------------------- */

    /// `<data_dir>/tasks.txt` plus one `<data_dir>/trivia/<name>.txt` per category.
    #[derive(Debug, Clone)]
    pub struct FlatFileStorage {
        tasks_path: PathBuf,
        trivia_dir: PathBuf,
    }

    impl FlatFileStorage {
        pub fn new(data_dir: impl AsRef<Path>) -> Self {
            let data_dir = data_dir.as_ref();
            Self::with_paths(data_dir.join(TASKS_FILE), data_dir.join(TRIVIA_DIR))
        }

        pub fn with_paths(tasks_path: impl Into<PathBuf>, trivia_dir: impl Into<PathBuf>) -> Self {
            Self {
                tasks_path: tasks_path.into(),
                trivia_dir: trivia_dir.into(),
            }
        }

        pub fn tasks_path(&self) -> &Path {
            &self.tasks_path
        }

        pub fn trivia_dir(&self) -> &Path {
            &self.trivia_dir
        }

        fn category_path(&self, name: &str) -> PathBuf {
            self.trivia_dir.join(format!("{name}.{CATEGORY_EXTENSION}"))
        }
    }

    impl Storage for FlatFileStorage {
        fn load_tasks(&self) -> Result<Vec<Task>> {
            let text = read_or_create(&self.tasks_path)?;
            let tasks = records::decode_tasks(&text).map_err(|err| {
                Error::with_context(
                    ErrorKind::CorruptedRecord,
                    format!(
                        "{} {}",
                        self.tasks_path.display(),
                        err.context().unwrap_or_default()
                    ),
                )
            })?;
            debug!("loaded {} task(s) from {}", tasks.len(), self.tasks_path.display());
            Ok(tasks)
        }

        fn save_tasks(&mut self, tasks: &[Task]) -> Result<()> {
            write_text(&self.tasks_path, &records::encode_tasks(tasks))?;
            info!("saved {} task(s) to {}", tasks.len(), self.tasks_path.display());
            Ok(())
        }

        fn load_trivia(&self, category: &str) -> Result<TriviaBank> {
            let path = self.category_path(category);
            let text = read_or_create(&path)?;
            let (bank, skipped) = records::decode_bank(&text);
            for line in skipped {
                warn!("skipping malformed trivia record at {}:{line}", path.display());
            }
            Ok(bank)
        }

        fn save_trivia(&mut self, category: &str, bank: &TriviaBank) -> Result<()> {
            write_text(&self.category_path(category), &records::encode_bank(bank))
        }

        fn list_categories(&self) -> Result<Vec<String>> {
            if !self.trivia_dir.exists() {
                return Ok(Vec::new());
            }
            let entries = fs::read_dir(&self.trivia_dir).map_err(|e| {
                Error::with_context(
                    ErrorKind::StorageUnreadable,
                    format!("{}: {e}", self.trivia_dir.display()),
                )
            })?;
            let mut names: Vec<String> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path.extension().and_then(|ext| ext.to_str()) == Some(CATEGORY_EXTENSION)
                })
                .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect();
            names.sort();
            Ok(names)
        }

        fn create_category(&mut self, name: &str) -> Result<()> {
            let path = self.category_path(name);
            if path.exists() {
                return Err(Error::with_context(ErrorKind::CategoryAlreadyExists, name));
            }
            write_text(&path, "")?;
            info!("created trivia category {name}");
            Ok(())
        }

        fn delete_category(&mut self, name: &str) -> Result<()> {
            let path = self.category_path(name);
            if !path.is_file() {
                return Err(Error::with_context(ErrorKind::CategoryNotFound, name));
            }
            fs::remove_file(&path).map_err(|e| {
                Error::with_context(
                    ErrorKind::StorageUnwritable,
                    format!("{}: {e}", path.display()),
                )
            })?;
            info!("deleted trivia category {name}");
            Ok(())
        }
    }

    /// Reads `path`, creating it empty (with parent directories) when absent.
    fn read_or_create(path: &Path) -> Result<String> {
        if path.is_dir() {
            return Err(Error::with_context(
                ErrorKind::StorageUnreadable,
                format!("{} is a directory", path.display()),
            ));
        }
        if !path.exists() {
            info!("creating empty data file {}", path.display());
            write_text(path, "")?;
            return Ok(String::new());
        }
        fs::read_to_string(path).map_err(|e| {
            Error::with_context(
                ErrorKind::StorageUnreadable,
                format!("{}: {e}", path.display()),
            )
        })
    }

    fn write_text(path: &Path, text: &str) -> Result<()> {
        let unwritable = |e: std::io::Error| {
            Error::with_context(
                ErrorKind::StorageUnwritable,
                format!("{}: {e}", path.display()),
            )
        };
        if path.is_dir() {
            return Err(Error::with_context(
                ErrorKind::StorageUnwritable,
                format!("{} is a directory", path.display()),
            ));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(unwritable)?;
        }
        fs::write(path, text).map_err(unwritable)
    }

    /* ----------------------------- Memory ----------------------------- */

    /// Volatile storage for tests and embedding. Counts task saves and can be
    /// switched to reject writes.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryStorage {
        tasks: Vec<Task>,
        categories: IndexMap<String, TriviaBank>,
        task_saves: usize,
        read_only: bool,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
            self.tasks = tasks;
            self
        }

        pub fn with_category(mut self, name: impl Into<String>, bank: TriviaBank) -> Self {
            self.categories.insert(name.into(), bank);
            self
        }

        pub fn set_read_only(&mut self, read_only: bool) {
            self.read_only = read_only;
        }

        pub fn saved_tasks(&self) -> &[Task] {
            &self.tasks
        }

        pub fn task_saves(&self) -> usize {
            self.task_saves
        }

        fn check_writable(&self) -> Result<()> {
            if self.read_only {
                return Err(Error::with_context(ErrorKind::StorageUnwritable, "read-only"));
            }
            Ok(())
        }
    }

    impl Storage for MemoryStorage {
        fn load_tasks(&self) -> Result<Vec<Task>> {
            Ok(self.tasks.clone())
        }

        fn save_tasks(&mut self, tasks: &[Task]) -> Result<()> {
            self.check_writable()?;
            self.tasks = tasks.to_vec();
            self.task_saves += 1;
            Ok(())
        }

        fn load_trivia(&self, category: &str) -> Result<TriviaBank> {
            Ok(self.categories.get(category).cloned().unwrap_or_default())
        }

        fn save_trivia(&mut self, category: &str, bank: &TriviaBank) -> Result<()> {
            self.check_writable()?;
            self.categories.insert(category.to_string(), bank.clone());
            Ok(())
        }

        fn list_categories(&self) -> Result<Vec<String>> {
            Ok(self.categories.keys().cloned().collect())
        }

        fn create_category(&mut self, name: &str) -> Result<()> {
            self.check_writable()?;
            if self.categories.contains_key(name) {
                return Err(Error::with_context(ErrorKind::CategoryAlreadyExists, name));
            }
            self.categories.insert(name.to_string(), TriviaBank::new());
            Ok(())
        }

        fn delete_category(&mut self, name: &str) -> Result<()> {
            self.check_writable()?;
            self.categories
                .shift_remove(name)
                .map(|_| ())
                .ok_or_else(|| Error::with_context(ErrorKind::CategoryNotFound, name))
        }
    }

}

pub mod session {
    //! The interactive session: routes each input line either to the command
    //! executor or, while a quiz is running, to the quiz.

    use crate::command::{Command, CommandParser, TriviaCommand};
    use crate::core::{Task, TaskList, TriviaBank, TriviaItem};
    use crate::error::{Error, ErrorKind, Result};
    use crate::format::{self, Outcome};
    use crate::storage::Storage;
    use log::{debug, error, info, warn};

    /// Input that ends a running quiz, compared without case.
    pub const STOP_PHRASE: &str = "trivia stop";

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub enum QuizState {
        #[default]
        Idle,
        /// `deck` holds the questions not yet asked.
        Active {
            deck: TriviaBank,
            current: TriviaItem,
        },
    }

    pub struct Session<S> {
        storage: S,
        parser: CommandParser,
        tasks: TaskList,
        default_category: String,
        category: String,
        bank: TriviaBank,
        quiz: QuizState,
        rng: fastrand::Rng,
        notices: Vec<Error>,
        exited: bool,
    }

    impl<S: Storage> Session<S> {
        /// Loads tasks and the default category. Load failures do not abort:
        /// the session starts empty and keeps them as startup notices.
        pub fn open(mut storage: S, default_category: impl Into<String>) -> Self {
            let default_category = default_category.into();
            let mut notices = Vec::new();

            let tasks = match storage.load_tasks() {
                Ok(tasks) => TaskList::from_tasks(tasks),
                Err(err) => {
                    warn!("starting with an empty task list: {err}");
                    notices.push(err);
                    TaskList::new()
                }
            };
            if let Err(err) = ensure_category(&mut storage, &default_category) {
                warn!("could not prepare trivia category {default_category}: {err}");
                notices.push(err);
            }
            let bank = match storage.load_trivia(&default_category) {
                Ok(bank) => bank,
                Err(err) => {
                    warn!("starting with an empty trivia bank: {err}");
                    notices.push(err);
                    TriviaBank::new()
                }
            };
            info!(
                "session opened with {} task(s) and {} question(s) in {default_category}",
                tasks.len(),
                bank.len()
            );

            Self {
                storage,
                parser: CommandParser::default(),
                tasks,
                category: default_category.clone(),
                default_category,
                bank,
                quiz: QuizState::Idle,
                rng: fastrand::Rng::new(),
                notices,
                exited: false,
            }
        }

        pub fn with_rng(mut self, rng: fastrand::Rng) -> Self {
            self.rng = rng;
            self
        }

        pub fn with_parser(mut self, parser: CommandParser) -> Self {
            self.parser = parser;
            self
        }

        pub fn welcome_text() -> &'static str {
            format::WELCOME
        }

        pub fn startup_notices(&self) -> &[Error] {
            &self.notices
        }

        pub fn has_exited(&self) -> bool {
            self.exited
        }

        pub fn tasks(&self) -> &TaskList {
            &self.tasks
        }

        pub fn bank(&self) -> &TriviaBank {
            &self.bank
        }

        pub fn current_category(&self) -> &str {
            &self.category
        }

        pub fn quiz_state(&self) -> &QuizState {
            &self.quiz
        }

        pub fn current_question(&self) -> Option<&TriviaItem> {
            match &self.quiz {
                QuizState::Active { current, .. } => Some(current),
                QuizState::Idle => None,
            }
        }

        pub fn storage(&self) -> &S {
            &self.storage
        }

        /// Handles one line and renders the response text.
        pub fn handle(&mut self, input: &str) -> String {
            match self.respond(input) {
                Ok(outcome) => format::render(&outcome),
                Err(err) => {
                    debug!("{input:?} failed: {err}");
                    format::render_error(&err)
                }
            }
        }

        pub fn respond(&mut self, input: &str) -> Result<Outcome> {
            if let QuizState::Active { deck, current } = std::mem::take(&mut self.quiz) {
                return Ok(self.quiz_input(input, deck, current));
            }
            let command = self.parser.parse(input)?;
            self.execute(command)
        }

        pub fn execute(&mut self, command: Command) -> Result<Outcome> {
            debug!("executing {command:?}");
            match command {
                Command::List => Ok(Outcome::Listed {
                    tasks: self.tasks.as_slice().to_vec(),
                }),
                Command::Mark(positions) => {
                    let tasks = self.tasks.mark(&positions)?;
                    self.persist_tasks()?;
                    Ok(Outcome::Marked { tasks })
                }
                Command::Unmark(positions) => {
                    let tasks = self.tasks.unmark(&positions)?;
                    self.persist_tasks()?;
                    Ok(Outcome::Unmarked { tasks })
                }
                Command::Delete(positions) => {
                    let tasks = self.tasks.delete_positions(&positions)?;
                    self.persist_tasks()?;
                    Ok(Outcome::Deleted {
                        tasks,
                        total: self.tasks.len(),
                    })
                }
                Command::Todo { description } => self.add_task(Task::todo(description)?, false),
                Command::Deadline {
                    description,
                    due,
                    date_warning,
                } => self.add_task(Task::deadline(description, due)?, date_warning),
                Command::Event {
                    description,
                    start,
                    end,
                    date_warning,
                } => self.add_task(Task::event(description, start, end)?, date_warning),
                Command::Find { keyword } => {
                    let matches = self
                        .tasks
                        .find(&keyword)
                        .into_iter()
                        .map(|(position, task)| (position, task.clone()))
                        .collect();
                    Ok(Outcome::Found { keyword, matches })
                }
                Command::Help => Ok(Outcome::Help),
                Command::Bye => {
                    self.exited = true;
                    Ok(Outcome::Goodbye)
                }
                Command::Trivia(command) => self.execute_trivia(command),
            }
        }

        fn add_task(&mut self, task: Task, date_warning: bool) -> Result<Outcome> {
            let total = self.tasks.add(task.clone());
            self.persist_tasks()?;
            Ok(Outcome::Added {
                task,
                total,
                date_warning,
            })
        }

        /// The in-memory list stays authoritative when saving fails.
        fn persist_tasks(&mut self) -> Result<()> {
            self.storage
                .save_tasks(self.tasks.as_slice())
                .inspect_err(|err| error!("saving tasks failed: {err}"))
        }

        fn persist_bank(&mut self) -> Result<()> {
            self.storage
                .save_trivia(&self.category, &self.bank)
                .inspect_err(|err| error!("saving trivia category {} failed: {err}", self.category))
        }

        fn execute_trivia(&mut self, command: TriviaCommand) -> Result<Outcome> {
            match command {
                TriviaCommand::ListCategories => Ok(Outcome::TriviaCategories {
                    categories: self.storage.list_categories()?,
                    current: self.category.clone(),
                }),
                TriviaCommand::ListItems => Ok(Outcome::TriviaItems {
                    category: self.category.clone(),
                    items: self.bank.iter().cloned().collect(),
                }),
                TriviaCommand::Add { question, answer } => {
                    let item = TriviaItem::new(question, answer)?;
                    let total = self.bank.add(item.clone());
                    self.persist_bank()?;
                    Ok(Outcome::TriviaAdded {
                        category: self.category.clone(),
                        item,
                        total,
                    })
                }
                TriviaCommand::Delete(position) => {
                    let item = self.bank.delete_position(position)?;
                    self.persist_bank()?;
                    Ok(Outcome::TriviaDeleted {
                        category: self.category.clone(),
                        item,
                        total: self.bank.len(),
                    })
                }
                TriviaCommand::Select { category } => {
                    if !self.storage.list_categories()?.contains(&category) {
                        return Err(Error::with_context(ErrorKind::CategoryNotFound, category));
                    }
                    self.bank = self.storage.load_trivia(&category)?;
                    self.category = category.clone();
                    info!("switched to trivia category {category}");
                    Ok(Outcome::CategorySelected {
                        category,
                        total: self.bank.len(),
                    })
                }
                TriviaCommand::Create { category } => {
                    self.storage.create_category(&category)?;
                    Ok(Outcome::CategoryCreated { category })
                }
                TriviaCommand::DeleteCategory { category } => {
                    self.storage.delete_category(&category)?;
                    let reset_to = if category == self.category {
                        self.reset_to_default()?;
                        Some(self.category.clone())
                    } else {
                        None
                    };
                    Ok(Outcome::CategoryDeleted { category, reset_to })
                }
                TriviaCommand::Start => {
                    let mut deck = self.bank.clone();
                    let current = deck.draw_random(&mut self.rng).ok_or_else(|| {
                        Error::with_context(ErrorKind::EmptyBank, self.category.clone())
                    })?;
                    let question = current.question().to_string();
                    self.quiz = QuizState::Active { deck, current };
                    debug!("quiz started on {}", self.category);
                    Ok(Outcome::QuizStarted {
                        category: self.category.clone(),
                        question,
                    })
                }
                TriviaCommand::Stop => Err(ErrorKind::NotInQuizMode.into()),
                TriviaCommand::Help => Ok(Outcome::TriviaHelp),
            }
        }

        /// Points the session at the default category before touching storage,
        /// so a failure never leaves it on a deleted one.
        fn reset_to_default(&mut self) -> Result<()> {
            self.category = self.default_category.clone();
            self.bank = TriviaBank::new();
            ensure_category(&mut self.storage, &self.default_category)?;
            self.bank = self.storage.load_trivia(&self.default_category)?;
            Ok(())
        }

        /// Every non-stop input while a quiz runs is an answer attempt.
        fn quiz_input(&mut self, input: &str, mut deck: TriviaBank, current: TriviaItem) -> Outcome {
            if input.trim().eq_ignore_ascii_case(STOP_PHRASE) {
                debug!("quiz stopped with {} question(s) unasked", deck.len());
                return Outcome::QuizStopped;
            }
            let correct = current.is_correct(input);
            let next_question = deck.draw_random(&mut self.rng).map(|next| {
                let question = next.question().to_string();
                self.quiz = QuizState::Active {
                    deck,
                    current: next,
                };
                question
            });
            if next_question.is_none() {
                debug!("quiz finished: deck exhausted");
            }
            Outcome::Answered {
                correct,
                answer: current.answer().to_string(),
                next_question,
            }
        }
    }

    fn ensure_category<S: Storage>(storage: &mut S, name: &str) -> Result<()> {
        if storage.list_categories()?.iter().any(|c| c == name) {
            return Ok(());
        }
        match storage.create_category(name) {
            Err(err) if err.kind() == ErrorKind::CategoryAlreadyExists => Ok(()),
            other => other,
        }
    }

}

pub mod config {
    //! Runtime configuration read from a TOML file.

    use anyhow::{Context, Result, anyhow};
    use directories::ProjectDirs;
    use log::LevelFilter;
    use serde::Deserialize;
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    /// Environment variable overriding the default data directory.
    pub const HOME_ENV: &str = "GRIMOIRE_HOME";
    pub const CONFIG_FILE: &str = "config.toml";
    pub const LOG_FILE: &str = "grimoire.log";

    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct FileConfig {
        data_dir: Option<PathBuf>,
        default_category: Option<String>,
        log_level: Option<String>,
        log_file: Option<PathBuf>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Config {
        pub data_dir: PathBuf,
        pub default_category: String,
        pub log_level: LevelFilter,
        /// Explicit log path; `None` means `<data_dir>/grimoire.log`.
        pub log_file: Option<PathBuf>,
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                data_dir: default_data_dir(),
                default_category: "default".to_string(),
                log_level: LevelFilter::Info,
                log_file: None,
            }
        }
    }

    impl Config {
        /// Reads `path`, or the per-user config file when `path` is `None`. A
        /// missing default file yields the defaults; a missing explicit file
        /// is an error.
        pub fn load(path: Option<&Path>) -> Result<Self> {
            let (path, explicit) = match path {
                Some(path) => (Some(path.to_path_buf()), true),
                None => (default_config_path(), false),
            };
            match path {
                Some(path) if explicit || path.exists() => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("reading config {}", path.display()))?;
                    Self::from_toml_str(&text)
                        .with_context(|| format!("parsing config {}", path.display()))
                }
                _ => Ok(Self::default()),
            }
        }

        pub fn from_toml_str(text: &str) -> Result<Self> {
            let file: FileConfig = toml::from_str(text)?;
            let defaults = Self::default();
            let default_category = match file.default_category {
                Some(name) => crate::command::validate_category_name(&name)
                    .map_err(|e| anyhow!("default_category: {e}"))?,
                None => defaults.default_category,
            };
            let log_level = match file.log_level {
                Some(level) => level
                    .parse::<LevelFilter>()
                    .map_err(|_| anyhow!("unknown log_level `{level}`"))?,
                None => defaults.log_level,
            };
            Ok(Self {
                data_dir: file.data_dir.unwrap_or(defaults.data_dir),
                default_category,
                log_level,
                log_file: file.log_file,
            })
        }

        pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
            self.data_dir = data_dir.into();
            self
        }

        pub fn log_path(&self) -> PathBuf {
            self.log_file
                .clone()
                .unwrap_or_else(|| self.data_dir.join(LOG_FILE))
        }
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "grimoire")
    }

    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// `$GRIMOIRE_HOME`, else the platform data directory, else `./data`.
    pub fn default_data_dir() -> PathBuf {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(home);
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"))
    }

}

pub mod logging {
    //! Logger setup: always a log file, plus stderr when verbose.

    use crate::config::Config;
    use anyhow::{Context, Result};
    use log::LevelFilter;
    use simplelog::{
        ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
        WriteLogger,
    };
    use std::fs::{self, OpenOptions};

    pub fn init(config: &Config, verbose: bool) -> Result<()> {
        let path = config.log_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))?;

        let log_config = ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_target_level(LevelFilter::Error)
            .build();
        let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
        loggers.push(WriteLogger::new(config.log_level, log_config.clone(), file));
        if verbose {
            loggers.push(TermLogger::new(
                LevelFilter::Debug,
                log_config,
                TerminalMode::Stderr,
                ColorChoice::Auto,
            ));
        }
        CombinedLogger::init(loggers).context("installing logger")?;
        log::debug!("logging to {}", path.display());
        Ok(())
    }
}

pub use error::{Error, ErrorKind, Result};
pub use session::Session;
