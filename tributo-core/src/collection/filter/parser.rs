//! Recursive-descent parser turning filter tokens into a [`Predicate`].

use super::lexer::{tokenize, Token, TokenKind};
use super::{CompareOp, Predicate};
use crate::collection::error::{CollectionError, Result};
use crate::collection::types::Value;

pub fn parse(input: &str) -> Result<Predicate> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(CollectionError::InvalidPredicate("empty filter expression".to_string()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let predicate = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error_at(token, "unexpected trailing input"));
    }
    Ok(predicate)
}

/// Deepest nesting of parentheses and NOT accepted in one expression.
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(self.error_at(&token, &format!("expected {}", what))),
            None => Err(unexpected_end(what)),
        }
    }

    fn error_at(&self, token: &Token, message: &str) -> CollectionError {
        CollectionError::InvalidPredicate(format!(
            "{} at offset {} (found {:?})",
            message, token.offset, token.kind
        ))
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut terms = vec![self.parse_and()?];
        while self.eat(&TokenKind::Or) {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut terms = vec![self.parse_unary()?];
        while self.eat(&TokenKind::And) {
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Predicate> {
        if self.eat(&TokenKind::Not) {
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Predicate>) -> Result<Predicate> {
        if self.depth >= MAX_DEPTH {
            let offset = self.tokens.get(self.pos.saturating_sub(1)).map_or(0, |t| t.offset);
            return Err(CollectionError::InvalidPredicate(format!(
                "expression nested deeper than {} levels at offset {}",
                MAX_DEPTH, offset
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        let token = self.next().ok_or_else(|| unexpected_end("an expression"))?;
        match token.kind {
            TokenKind::LParen => {
                let inner = self.nested(Self::parse_or)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::True => Ok(Predicate::Const(true)),
            TokenKind::False => Ok(Predicate::Const(false)),
            TokenKind::Ident(column) => self.parse_condition(column),
            _ => Err(self.error_at(&token, "expected a column name or '('")),
        }
    }

    fn parse_condition(&mut self, column: String) -> Result<Predicate> {
        let token = self.next().ok_or_else(|| unexpected_end("an operator"))?;
        let op = match token.kind {
            TokenKind::Eq => Some(CompareOp::Eq),
            TokenKind::Ne => Some(CompareOp::Ne),
            TokenKind::Lt => Some(CompareOp::Lt),
            TokenKind::Le => Some(CompareOp::Le),
            TokenKind::Gt => Some(CompareOp::Gt),
            TokenKind::Ge => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            let value = self.parse_literal()?;
            return Ok(Predicate::Compare { column, op, value });
        }

        match token.kind {
            TokenKind::Like => self.parse_like(column, false),
            TokenKind::Ilike => self.parse_like(column, true),
            TokenKind::In => self.parse_in(column),
            TokenKind::Not => {
                let next = self.next().ok_or_else(|| unexpected_end("LIKE, ILIKE or IN"))?;
                let inner = match next.kind {
                    TokenKind::Like => self.parse_like(column, false)?,
                    TokenKind::Ilike => self.parse_like(column, true)?,
                    TokenKind::In => self.parse_in(column)?,
                    _ => return Err(self.error_at(&next, "expected LIKE, ILIKE or IN after NOT")),
                };
                Ok(Predicate::Not(Box::new(inner)))
            }
            TokenKind::Is => {
                let negated = self.eat(&TokenKind::Not);
                self.expect(TokenKind::Null, "NULL")?;
                let check = Predicate::IsNull { column };
                Ok(if negated {
                    Predicate::Not(Box::new(check))
                } else {
                    check
                })
            }
            _ => Err(self.error_at(&token, "expected a comparison operator, LIKE, IN or IS")),
        }
    }

    fn parse_like(&mut self, column: String, case_insensitive: bool) -> Result<Predicate> {
        match self.next() {
            Some(Token {
                kind: TokenKind::Str(pattern),
                ..
            }) => Ok(Predicate::Like {
                column,
                pattern,
                case_insensitive,
            }),
            Some(token) => Err(self.error_at(&token, "LIKE expects a quoted pattern")),
            None => Err(unexpected_end("a LIKE pattern")),
        }
    }

    fn parse_in(&mut self, column: String) -> Result<Predicate> {
        self.expect(TokenKind::LParen, "'(' after IN")?;
        let mut values = vec![self.parse_literal()?];
        while self.eat(&TokenKind::Comma) {
            values.push(self.parse_literal()?);
        }
        self.expect(TokenKind::RParen, "')' closing the IN list")?;
        Ok(Predicate::In { column, values })
    }

    fn parse_literal(&mut self) -> Result<Value> {
        let token = self.next().ok_or_else(|| unexpected_end("a literal"))?;
        match token.kind {
            TokenKind::Str(s) => Ok(Value::String(s)),
            TokenKind::Int(i) => Ok(Value::Integer(i)),
            TokenKind::Float(f) => Ok(Value::Float(f)),
            TokenKind::True => Ok(Value::Boolean(true)),
            TokenKind::False => Ok(Value::Boolean(false)),
            TokenKind::Null => Err(self.error_at(&token, "comparison with NULL is never true, use IS NULL")),
            _ => Err(self.error_at(&token, "expected a literal")),
        }
    }
}

fn unexpected_end(what: &str) -> CollectionError {
    CollectionError::InvalidPredicate(format!("unexpected end of expression, expected {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let p = parse("vigente = true AND (text LIKE '%IPTU%' OR text LIKE '%ITBI%')").unwrap();
        assert_eq!(
            p,
            Predicate::And(vec![
                Predicate::eq("vigente", true),
                Predicate::Or(vec![
                    Predicate::like("text", "%IPTU%"),
                    Predicate::like("text", "%ITBI%"),
                ]),
            ])
        );

        // AND binds tighter than OR
        let p = parse("a = 1 OR b = 2 AND c = 3").unwrap();
        assert_eq!(
            p,
            Predicate::Or(vec![
                Predicate::eq("a", 1),
                Predicate::And(vec![Predicate::eq("b", 2), Predicate::eq("c", 3)]),
            ])
        );
    }

    #[test]
    fn test_parse_negations() {
        assert_eq!(
            parse("norma NOT ILIKE 'decreto%'").unwrap(),
            !Predicate::ilike("norma", "decreto%")
        );
        assert_eq!(parse("ano IS NOT NULL").unwrap(), !Predicate::is_null("ano"));
        assert_eq!(
            parse("NOT nivel IN (1, 2)").unwrap(),
            !Predicate::in_list("nivel", vec![1.into(), 2.into()])
        );
    }

    #[test]
    fn test_parse_rejects_bad_syntax() {
        for bad in [
            "",
            "vigente =",
            "vigente = true AND",
            "(ano > 2000",
            "ano > 2000)",
            "ano BETWEEN 1 AND 2",
            "text LIKE 5",
            "ano = NULL",
            "= 3",
        ] {
            assert!(
                matches!(parse(bad), Err(CollectionError::InvalidPredicate(_))),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let depth = 50_000;
        let deep = format!("{}vigente = TRUE{}", "(".repeat(depth), ")".repeat(depth));
        let err = parse(&deep).unwrap_err();
        assert!(matches!(err, CollectionError::InvalidPredicate(ref msg) if msg.contains("nested deeper")));

        let negations = format!("{}vigente = TRUE", "NOT ".repeat(depth));
        assert!(matches!(parse(&negations), Err(CollectionError::InvalidPredicate(_))));

        let shallow = format!("{}vigente = TRUE{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse(&shallow).unwrap(), Predicate::eq("vigente", true));
    }
}
