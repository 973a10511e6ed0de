//! Parser for the CQL subset the in-process store accepts.
//!
//! Supported statements:
//!
//! ```text
//! DROP KEYSPACE [IF EXISTS] ks
//! CREATE KEYSPACE [IF NOT EXISTS] ks [WITH ...]
//! CREATE TABLE [IF NOT EXISTS] ks.t (col type, ..., PRIMARY KEY((p, ...), c, ...))
//! INSERT INTO ks.t (col, ...) VALUES (?, ...)
//! SELECT * | col, ... FROM ks.t WHERE col = ? [AND col = ?]...
//! ```
//!
//! Literal values are not accepted in INSERT or SELECT: every value is a
//! bound `?` marker.

use loyalty_core::{Column, ColumnType, Container};
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while},
    character::complete::{char, multispace0, satisfy},
    combinator::{all_consuming, map, not, opt, recognize, rest, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

/// A qualified container name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub keyspace: String,
    pub table: String,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    DropKeyspace {
        name: String,
        if_exists: bool,
    },
    CreateKeyspace {
        name: String,
        if_not_exists: bool,
    },
    CreateTable {
        keyspace: String,
        container: Container,
        if_not_exists: bool,
    },
    Insert {
        table: TableRef,
        columns: Vec<String>,
    },
    Select {
        table: TableRef,
        /// `None` for `SELECT *`.
        columns: Option<Vec<String>>,
        /// Columns restricted by `col = ?`, in marker order.
        filters: Vec<String>,
    },
}

impl Statement {
    /// Number of `?` markers.
    pub fn marker_count(&self) -> usize {
        match self {
            Statement::Insert { columns, .. } => columns.len(),
            Statement::Select { filters, .. } => filters.len(),
            _ => 0,
        }
    }
}

/// Syntax accepted before column types and keys are checked.
enum Parsed {
    Ready(Statement),
    Insert {
        table: TableRef,
        columns: Vec<String>,
        markers: usize,
    },
    Table {
        table: TableRef,
        if_not_exists: bool,
        elements: Vec<Element>,
    },
}

enum Element {
    Column { name: String, type_name: String },
    Key(Vec<String>, Vec<String>),
}

// --- BASIC PARSERS ---

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword(word: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| ws(terminated(tag_no_case(word), not(satisfy(is_ident_char))))(input)
}

fn symbol(c: char) -> impl FnMut(&str) -> IResult<&str, char> {
    move |input| ws(char(c))(input)
}

fn ident(input: &str) -> IResult<&str, String> {
    ws(map(
        recognize(pair(
            satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_ident_char),
        )),
        |name: &str| name.to_ascii_lowercase(),
    ))(input)
}

fn ident_list(input: &str) -> IResult<&str, Vec<String>> {
    separated_list1(symbol(','), ident)(input)
}

fn table_ref(input: &str) -> IResult<&str, TableRef> {
    map(
        separated_pair(ident, symbol('.'), ident),
        |(keyspace, table)| TableRef { keyspace, table },
    )(input)
}

fn if_not_exists(input: &str) -> IResult<&str, bool> {
    map(
        opt(tuple((keyword("IF"), keyword("NOT"), keyword("EXISTS")))),
        |found| found.is_some(),
    )(input)
}

/// `((a, b), c, d)` or `(a, c)`: the first element is the partition key.
fn primary_key(input: &str) -> IResult<&str, (Vec<String>, Vec<String>)> {
    delimited(
        symbol('('),
        pair(
            alt((
                delimited(symbol('('), ident_list, symbol(')')),
                map(ident, |column| vec![column]),
            )),
            many0(preceded(symbol(','), ident)),
        ),
        symbol(')'),
    )(input)
}

fn table_element(input: &str) -> IResult<&str, Element> {
    alt((
        map(
            preceded(pair(keyword("PRIMARY"), keyword("KEY")), primary_key),
            |(partition, clustering)| Element::Key(partition, clustering),
        ),
        map(pair(ident, ident), |(name, type_name)| Element::Column {
            name,
            type_name,
        }),
    ))(input)
}

// --- STATEMENT PARSERS ---

fn parse_drop_keyspace(input: &str) -> IResult<&str, Parsed> {
    let (input, _) = pair(keyword("DROP"), keyword("KEYSPACE"))(input)?;
    let (input, if_exists) = opt(pair(keyword("IF"), keyword("EXISTS")))(input)?;
    let (input, name) = ident(input)?;
    Ok((
        input,
        Parsed::Ready(Statement::DropKeyspace {
            name,
            if_exists: if_exists.is_some(),
        }),
    ))
}

fn parse_create_keyspace(input: &str) -> IResult<&str, Parsed> {
    let (input, _) = pair(keyword("CREATE"), keyword("KEYSPACE"))(input)?;
    let (input, if_not_exists) = if_not_exists(input)?;
    let (input, name) = ident(input)?;
    // Replication options are accepted and ignored.
    let (input, _) = opt(preceded(keyword("WITH"), rest))(input)?;
    Ok((
        input,
        Parsed::Ready(Statement::CreateKeyspace {
            name,
            if_not_exists,
        }),
    ))
}

fn parse_create_table(input: &str) -> IResult<&str, Parsed> {
    let (input, _) = pair(keyword("CREATE"), keyword("TABLE"))(input)?;
    let (input, if_not_exists) = if_not_exists(input)?;
    let (input, table) = table_ref(input)?;
    let (input, elements) = delimited(
        symbol('('),
        separated_list1(symbol(','), table_element),
        symbol(')'),
    )(input)?;
    Ok((
        input,
        Parsed::Table {
            table,
            if_not_exists,
            elements,
        },
    ))
}

fn parse_insert(input: &str) -> IResult<&str, Parsed> {
    let (input, _) = pair(keyword("INSERT"), keyword("INTO"))(input)?;
    let (input, table) = table_ref(input)?;
    let (input, columns) = delimited(symbol('('), ident_list, symbol(')'))(input)?;
    let (input, _) = keyword("VALUES")(input)?;
    let (input, markers) = delimited(
        symbol('('),
        separated_list1(symbol(','), symbol('?')),
        symbol(')'),
    )(input)?;
    Ok((
        input,
        Parsed::Insert {
            table,
            columns,
            markers: markers.len(),
        },
    ))
}

fn parse_select(input: &str) -> IResult<&str, Parsed> {
    let (input, _) = keyword("SELECT")(input)?;
    let (input, columns) = alt((value(None, symbol('*')), map(ident_list, Some)))(input)?;
    let (input, _) = keyword("FROM")(input)?;
    let (input, table) = table_ref(input)?;
    let (input, _) = keyword("WHERE")(input)?;
    let (input, filters) = separated_list1(
        keyword("AND"),
        terminated(ident, pair(symbol('='), symbol('?'))),
    )(input)?;
    Ok((
        input,
        Parsed::Ready(Statement::Select {
            table,
            columns,
            filters,
        }),
    ))
}

/// Parse one statement. A trailing `;` is allowed.
pub fn parse(text: &str) -> Result<Statement, String> {
    let result = all_consuming(terminated(
        alt((
            parse_drop_keyspace,
            parse_create_keyspace,
            parse_create_table,
            parse_insert,
            parse_select,
        )),
        opt(symbol(';')),
    ))(text);

    match result {
        Ok((_, parsed)) => parsed.check(),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.trim_start().chars().take(20).collect();
            if context.is_empty() {
                Err("unexpected end of statement".to_string())
            } else {
                Err(format!("invalid syntax near '{context}'"))
            }
        }
        Err(nom::Err::Incomplete(_)) => Err("incomplete statement".to_string()),
    }
}

impl Parsed {
    fn check(self) -> Result<Statement, String> {
        match self {
            Parsed::Ready(statement) => Ok(statement),
            Parsed::Insert {
                table,
                columns,
                markers,
            } => {
                if markers != columns.len() {
                    return Err(format!("{} columns but {markers} values", columns.len()));
                }
                Ok(Statement::Insert { table, columns })
            }
            Parsed::Table {
                table,
                if_not_exists,
                elements,
            } => {
                let mut columns = Vec::new();
                let mut key = None;
                for element in elements {
                    match element {
                        Element::Column { name, type_name } => {
                            let column_type = ColumnType::from_cql(&type_name)
                                .ok_or_else(|| format!("unsupported column type '{type_name}'"))?;
                            columns.push(Column::new(name, column_type));
                        }
                        Element::Key(partition, clustering) => key = Some((partition, clustering)),
                    }
                }

                let (partition_key, clustering_key) =
                    key.ok_or_else(|| format!("table '{}' has no PRIMARY KEY", table.table))?;
                let container = Container {
                    name: table.table,
                    columns,
                    partition_key,
                    clustering_key,
                };
                for key_column in container.primary_key() {
                    if container.column(key_column).is_none() {
                        return Err(format!("unknown key column '{key_column}'"));
                    }
                }

                Ok(Statement::CreateTable {
                    keyspace: table.keyspace,
                    container,
                    if_not_exists,
                })
            }
        }
    }
}
