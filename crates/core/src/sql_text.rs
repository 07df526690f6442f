use crate::services::TableParams;

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

#[must_use]
pub fn qualified_table_sql(params: &TableParams) -> String {
    match params.database_name.as_deref().filter(|name| !name.is_empty()) {
        Some(database) => format!(
            "{}.{}",
            quote_identifier(database),
            quote_identifier(&params.table_name)
        ),
        None => quote_identifier(&params.table_name),
    }
}

#[must_use]
pub fn drop_table_sql(params: &TableParams) -> String {
    format!("DROP TABLE {}", qualified_table_sql(params))
}

#[must_use]
pub fn show_create_table_sql(params: &TableParams) -> String {
    format!("SHOW CREATE TABLE {}", qualified_table_sql(params))
}

/// Text appended to the console when a table node is opened.
#[must_use]
pub fn select_all_statement(table_name: &str) -> String {
    format!("SELECT * FROM {table_name};\n")
}

/// Splits on `;` outside quotes and comments. Comments are dropped, empty
/// statements skipped.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_backtick = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
                current.push(ch);
            }
            continue;
        }

        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }

        if (in_single_quote || in_double_quote) && ch == '\\' {
            current.push(ch);
            if let Some(escaped) = chars.next() {
                current.push(escaped);
            }
            continue;
        }

        if !in_single_quote && !in_double_quote && !in_backtick {
            if ch == '-' && starts_dash_comment(&chars) {
                chars.next();
                in_line_comment = true;
                continue;
            }

            if ch == '#' {
                in_line_comment = true;
                continue;
            }

            if ch == '/' && chars.peek() == Some(&'*') {
                chars.next();
                in_block_comment = true;
                continue;
            }
        }

        match ch {
            '\'' if !in_double_quote && !in_backtick => {
                in_single_quote = !in_single_quote;
                current.push(ch);
            }
            '"' if !in_single_quote && !in_backtick => {
                in_double_quote = !in_double_quote;
                current.push(ch);
            }
            '`' if !in_single_quote && !in_double_quote => {
                in_backtick = !in_backtick;
                current.push(ch);
            }
            ';' if !in_single_quote && !in_double_quote && !in_backtick => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }

    statements
}

/// MySQL only treats `--` as a comment when whitespace (or the end of input)
/// follows it; `5--3` is arithmetic.
fn starts_dash_comment(rest: &std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    let mut ahead = rest.clone();
    ahead.next() == Some('-') && ahead.next().map_or(true, char::is_whitespace)
}
