//! Query parser using Pest.
//!
//! The grammar driver walks the parse tree top-down and replays it as
//! builder actions: open a table at each SELECT, record clauses into it,
//! close it when the statement or subquery ends. Clause order inside a
//! statement mirrors source order, so expressions are always created in
//! the scope of the table that owns them.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::builder::{Compilation, QueryBuilder};
use crate::error::{Error, Result};

#[derive(Parser)]
#[grammar = "histql.pest"]
struct HistqlParser;

/// Parse one statement into a query tree ready for code generation.
pub fn parse(input: &str) -> Result<Compilation> {
    let pairs = HistqlParser::parse(Rule::program, input).map_err(convert_error)?;

    let mut builder = QueryBuilder::new();
    for pair in pairs {
        if pair.as_rule() == Rule::statement {
            build_statement(pair, &mut builder)?;
        }
    }
    Ok(builder.finish())
}

fn convert_error(err: pest::error::Error<Rule>) -> Error {
    use pest::error::LineColLocation;
    let (line, column) = match err.line_col {
        LineColLocation::Pos((line, col)) => (line, col),
        LineColLocation::Span((line, col), _) => (line, col),
    };
    Error::syntax(line, column, err.variant.message())
}

fn build_statement(pair: Pair<Rule>, b: &mut QueryBuilder) -> Result<()> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::named_select => {
            let mut parts = inner.into_inner();
            let select = parts.next().unwrap();
            let name = parts.next().unwrap().as_str().to_string();
            b.table_start();
            build_select(select, b)?;
            b.table_end(Some(&name))
        }
        Rule::select => {
            b.table_start();
            build_select(inner, b)?;
            b.table_end(None)?;
            b.simple_table_end();
            Ok(())
        }
        rule => Err(Error::invalid(format!("unexpected statement: {:?}", rule))),
    }
}

fn build_select(pair: Pair<Rule>, b: &mut QueryBuilder) -> Result<()> {
    for clause in pair.into_inner() {
        match clause.as_rule() {
            Rule::selection_list => build_selections(clause, b)?,
            Rule::from_clause => build_from(clause, b)?,
            Rule::join_clause => build_join(clause, b)?,
            Rule::where_clause => build_where(clause, b),
            _ => {}
        }
    }
    Ok(())
}

fn build_selections(pair: Pair<Rule>, b: &mut QueryBuilder) -> Result<()> {
    for sel in pair.into_inner() {
        let mut inner = sel.into_inner();
        let expr = build_expr(inner.next().unwrap(), b)?;
        if let Some(alias) = inner.next() {
            b.add_expr(alias.as_str(), expr);
        }
        b.add_selection(expr);
    }
    Ok(())
}

fn build_from(pair: Pair<Rule>, b: &mut QueryBuilder) -> Result<()> {
    let table_ref = pair.into_inner().next().unwrap();
    let inner = table_ref.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::subquery_ref => {
            let mut parts = inner.into_inner();
            let select = parts.next().unwrap().into_inner().next().unwrap();
            let name = parts.next().unwrap().as_str().to_string();
            b.table_start();
            build_select(select, b)?;
            b.from_table_end(&name)
        }
        Rule::event_ref => {
            let expr = build_event_ref(inner, b);
            b.add_from(expr);
            Ok(())
        }
        rule => Err(Error::invalid(format!("unexpected FROM target: {:?}", rule))),
    }
}

fn build_join(pair: Pair<Rule>, b: &mut QueryBuilder) -> Result<()> {
    let mut inner = pair.into_inner();
    let table_ref = inner.next().unwrap().into_inner().next().unwrap();
    match table_ref.as_rule() {
        Rule::subquery_ref => {
            let mut parts = table_ref.into_inner();
            let select = parts.next().unwrap().into_inner().next().unwrap();
            let name = parts.next().unwrap().as_str().to_string();
            b.table_start();
            build_select(select, b)?;
            b.table_end(Some(&name))?;
            let expr = b.field(&name, None);
            b.add_to(expr);
        }
        Rule::event_ref => {
            let expr = build_event_ref(table_ref, b);
            b.add_to(expr);
        }
        rule => return Err(Error::invalid(format!("unexpected JOIN target: {:?}", rule))),
    }

    let on_clause = inner.next().unwrap();
    for cond in on_clause.into_inner() {
        let mut sides = cond.into_inner();
        let a = sides.next().unwrap().as_str().to_string();
        let other = sides.next().unwrap().as_str().to_string();
        b.add_match(&a, &other);
    }
    Ok(())
}

/// `event` or `event as alias`; the alias becomes a label bound to the
/// event so later `alias.field` paths resolve through it.
fn build_event_ref(pair: Pair<Rule>, b: &mut QueryBuilder) -> crate::ast::ExprId {
    let mut inner = pair.into_inner();
    let path = inner.next().unwrap().as_str().to_string();
    let alias = inner.next().map(|p| p.as_str().to_string());
    b.field(&path, alias.as_deref())
}

fn build_where(pair: Pair<Rule>, b: &mut QueryBuilder) {
    let mut inner = pair.into_inner();
    let left = inner.next().unwrap().as_str().to_string();
    let op = inner.next().unwrap().as_str().to_string();
    let right = inner.next().unwrap().as_str().to_string();
    let filter = b.filter(&left, &right, &op);
    b.add_where(filter);
}

fn build_expr(pair: Pair<Rule>, b: &mut QueryBuilder) -> Result<crate::ast::ExprId> {
    match pair.as_rule() {
        Rule::expr | Rule::product => {
            let mut inner = pair.into_inner();
            let mut acc = build_expr(inner.next().unwrap(), b)?;
            while let Some(op) = inner.next() {
                let rhs = build_expr(inner.next().unwrap(), b)?;
                acc = match op.as_str() {
                    "+" => b.plus(acc, rhs),
                    "-" => b.minus(acc, rhs),
                    "*" => b.mult(acc, rhs),
                    "/" => b.divide(acc, rhs),
                    other => return Err(Error::invalid(format!("unknown operator {}", other))),
                };
            }
            Ok(acc)
        }
        Rule::field_path | Rule::number => Ok(b.field(pair.as_str(), None)),
        rule => Err(Error::invalid(format!("unexpected expression: {:?}", rule))),
    }
}
