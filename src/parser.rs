use crate::{
    ast::{
        BinaryOp, CatchClause, ClassDecl, Expr, ExprKind, FieldDecl, Literal, MethodDecl, Param,
        Program, Stmt, StmtKind, TypeExpr, UnaryOp,
    },
    config::LanguageConfig,
    diagnostics::{Diagnostic, DiagnosticKind, SourcePos},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

/// Lexes and parses a complete program. The first error aborts parsing.
pub fn parse_program(source: &str, config: &LanguageConfig) -> Result<Program, Diagnostic> {
    let tokens = Lexer::new(source, config).tokenize()?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        if let Some(token) = self.peek().cloned() {
            match &token.kind {
                TokenKind::Keyword(Keyword::Var) => return self.parse_var_decl(),
                TokenKind::Keyword(Keyword::Function) => return self.parse_function(false),
                TokenKind::Keyword(Keyword::Async) => {
                    let async_token = self.advance();
                    let next = self
                        .peek()
                        .cloned()
                        .ok_or_else(|| self.error_eof("expected function after `async`"))?;
                    if next.kind != TokenKind::Keyword(Keyword::Function) {
                        return Err(self.error(&next, "expected function declaration after `async`"));
                    }
                    let mut stmt = self.parse_function(true)?;
                    stmt.pos = async_token.pos;
                    return Ok(stmt);
                }
                TokenKind::Keyword(Keyword::Class) => return self.parse_class(),
                TokenKind::Keyword(Keyword::Import) => return self.parse_import(),
                TokenKind::Keyword(Keyword::If) => return self.parse_if(),
                TokenKind::Keyword(Keyword::While) => return self.parse_while(),
                TokenKind::Keyword(Keyword::For) => return self.parse_for(),
                TokenKind::Keyword(Keyword::Try) => return self.parse_try(),
                TokenKind::Keyword(Keyword::Throw) => return self.parse_throw(),
                TokenKind::Keyword(Keyword::Return) => return self.parse_return(),
                TokenKind::Keyword(Keyword::Break) => {
                    let token = self.advance();
                    self.consume_optional_semicolon();
                    return Ok(Stmt {
                        kind: StmtKind::Break,
                        pos: token.pos,
                    });
                }
                TokenKind::Keyword(Keyword::Continue) => {
                    let token = self.advance();
                    self.consume_optional_semicolon();
                    return Ok(Stmt {
                        kind: StmtKind::Continue,
                        pos: token.pos,
                    });
                }
                TokenKind::LBrace => {
                    let pos = token.pos;
                    let body = self.parse_block()?;
                    return Ok(Stmt {
                        kind: StmtKind::Block(body),
                        pos,
                    });
                }
                _ => {}
            }
        }
        self.parse_expression_statement()
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, Diagnostic> {
        let var_token = self.consume_keyword(Keyword::Var)?;
        let name_token = self.consume_identifier("expected variable name")?;
        let annotation = if self.matches(TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let initializer = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.consume_optional_semicolon();
        Ok(Stmt {
            kind: StmtKind::VarDecl {
                name: name_token.lexeme.clone(),
                annotation,
                initializer,
            },
            pos: var_token.pos,
        })
    }

    fn parse_function(&mut self, is_async: bool) -> Result<Stmt, Diagnostic> {
        let fn_token = self.consume_keyword(Keyword::Function)?;
        let name_token = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let params = self.parse_params()?;
        let return_type = if self.matches(TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::Function {
                name: name_token.lexeme.clone(),
                params,
                return_type,
                body,
                is_async,
            },
            pos: fn_token.pos,
        })
    }

    /// Parses a parenthesized parameter list. Once one parameter carries a
    /// default, every later one must too.
    fn parse_params(&mut self) -> Result<Vec<Param>, Diagnostic> {
        let mut params = Vec::new();
        let mut seen_default = false;
        if !self.check(TokenKind::RParen) {
            loop {
                let name_token = self.consume_identifier("expected parameter name")?;
                let annotation = if self.matches(TokenKind::Colon) {
                    Some(self.parse_type_expr()?)
                } else {
                    None
                };
                let default = if self.matches(TokenKind::Assign) {
                    seen_default = true;
                    Some(self.parse_expression()?)
                } else {
                    if seen_default {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Parser,
                            format!(
                                "parameter `{}` without a default follows a defaulted parameter",
                                name_token.lexeme
                            ),
                        )
                        .with_pos(name_token.pos));
                    }
                    None
                };
                params.push(Param {
                    name: name_token.lexeme.clone(),
                    annotation,
                    default,
                    pos: name_token.pos,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        Ok(params)
    }

    fn parse_class(&mut self) -> Result<Stmt, Diagnostic> {
        let class_token = self.consume_keyword(Keyword::Class)?;
        let name_token = self.consume_identifier("expected class name")?;
        let parent = if self.matches_keyword(Keyword::Extends) {
            let parent_token = self.consume_identifier("expected parent class name")?;
            Some(parent_token.lexeme.clone())
        } else {
            None
        };
        self.consume(TokenKind::LBrace, "expected `{` after class header")?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if self.check(TokenKind::Keyword(Keyword::Var)) {
                let field_token = self.advance();
                let field_name = self.consume_identifier("expected field name")?;
                let annotation = if self.matches(TokenKind::Colon) {
                    Some(self.parse_type_expr()?)
                } else {
                    None
                };
                let default = if self.matches(TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.consume_optional_semicolon();
                fields.push(FieldDecl {
                    name: field_name.lexeme.clone(),
                    annotation,
                    default,
                    pos: field_token.pos,
                });
            } else {
                let is_async = self.matches_keyword(Keyword::Async);
                let method_token = self.consume_keyword(Keyword::Function)?;
                let method_name = self.consume_identifier("expected method name")?;
                self.consume(TokenKind::LParen, "expected `(` after method name")?;
                let params = self.parse_params()?;
                let return_type = if self.matches(TokenKind::Colon) {
                    Some(self.parse_type_expr()?)
                } else {
                    None
                };
                let body = self.parse_block()?;
                methods.push(MethodDecl {
                    name: method_name.lexeme.clone(),
                    params,
                    return_type,
                    body,
                    is_async,
                    pos: method_token.pos,
                });
            }
        }
        self.consume(TokenKind::RBrace, "expected `}` after class body")?;
        Ok(Stmt {
            kind: StmtKind::Class(ClassDecl {
                name: name_token.lexeme.clone(),
                parent,
                fields,
                methods,
                pos: class_token.pos,
            }),
            pos: class_token.pos,
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, Diagnostic> {
        let import_token = self.consume_keyword(Keyword::Import)?;
        let name_token = self.consume_identifier("expected module name after import")?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            kind: StmtKind::Import {
                module: name_token.lexeme.clone(),
            },
            pos: import_token.pos,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let if_token = self.consume_keyword(Keyword::If)?;
        let condition = self.parse_expression()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            if self.check(TokenKind::Keyword(Keyword::If)) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt {
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
            pos: if_token.pos,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let while_token = self.consume_keyword(Keyword::While)?;
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::While { condition, body },
            pos: while_token.pos,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let for_token = self.consume_keyword(Keyword::For)?;
        let binding = self.consume_identifier("expected loop binding")?;
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::ForIn {
                binding: binding.lexeme.clone(),
                iterable,
                body,
            },
            pos: for_token.pos,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, Diagnostic> {
        let try_token = self.consume_keyword(Keyword::Try)?;
        let body = self.parse_block()?;
        let mut catches = Vec::new();
        while self.check(TokenKind::Keyword(Keyword::Catch)) {
            let catch_token = self.advance();
            let (filter, binding) = if self.matches(TokenKind::LParen) {
                let first = self.consume_identifier("expected exception binding")?;
                let clause = if self.check(TokenKind::Identifier) {
                    let second = self.advance();
                    (Some(first.lexeme.clone()), Some(second.lexeme.clone()))
                } else {
                    (None, Some(first.lexeme.clone()))
                };
                self.consume(TokenKind::RParen, "expected `)` after catch clause")?;
                clause
            } else {
                (None, None)
            };
            let catch_body = self.parse_block()?;
            catches.push(CatchClause {
                filter,
                binding,
                body: catch_body,
                pos: catch_token.pos,
            });
        }
        let finally = if self.matches_keyword(Keyword::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(Diagnostic::new(
                DiagnosticKind::Parser,
                "try block requires at least one catch or a finally",
            )
            .with_pos(try_token.pos));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                catches,
                finally,
            },
            pos: try_token.pos,
        })
    }

    fn parse_throw(&mut self) -> Result<Stmt, Diagnostic> {
        let throw_token = self.consume_keyword(Keyword::Throw)?;
        let value = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            kind: StmtKind::Throw(value),
            pos: throw_token.pos,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let return_token = self.consume_keyword(Keyword::Return)?;
        let expr = if self.check(TokenKind::Semicolon)
            || self.check(TokenKind::RBrace)
            || self.check(TokenKind::Eof)
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_optional_semicolon();
        Ok(Stmt {
            kind: StmtKind::Return(expr),
            pos: return_token.pos,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        self.consume(TokenKind::RBrace, "expected `}` to close block")?;
        Ok(statements)
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            pos: expr.pos,
            kind: StmtKind::Expr(expr),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_or()?;
        if self.matches(TokenKind::Assign) {
            let equals_pos = self.previous().pos;
            let value = self.parse_assignment()?;
            match expr.kind {
                ExprKind::Variable(_) | ExprKind::Index { .. } | ExprKind::Field { .. } => {
                    Ok(Expr {
                        pos: expr.pos,
                        kind: ExprKind::Assign {
                            target: Box::new(expr),
                            value: Box::new(value),
                        },
                    })
                }
                _ => Err(
                    Diagnostic::new(DiagnosticKind::Parser, "invalid assignment target")
                        .with_pos(equals_pos),
                ),
            }
        } else {
            Ok(expr)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches(TokenKind::OrOr) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_equality()?;
        while self.matches(TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        loop {
            if self.matches(TokenKind::EqualEqual) {
                let right = self.parse_comparison()?;
                expr = binary(BinaryOp::Equal, expr, right);
            } else if self.matches(TokenKind::BangEqual) {
                let right = self.parse_comparison()?;
                expr = binary(BinaryOp::NotEqual, expr, right);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_term()?;
        while let Some(op) = if self.matches(TokenKind::LessEqual) {
            Some(BinaryOp::LessEqual)
        } else if self.matches(TokenKind::GreaterEqual) {
            Some(BinaryOp::GreaterEqual)
        } else if self.matches(TokenKind::Less) {
            Some(BinaryOp::Less)
        } else if self.matches(TokenKind::Greater) {
            Some(BinaryOp::Greater)
        } else {
            None
        } {
            let right = self.parse_term()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_factor()?;
        loop {
            if self.matches(TokenKind::Plus) {
                let right = self.parse_factor()?;
                expr = binary(BinaryOp::Add, expr, right);
            } else if self.matches(TokenKind::Minus) {
                let right = self.parse_factor()?;
                expr = binary(BinaryOp::Sub, expr, right);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = if self.matches(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        if self.matches(TokenKind::Minus) {
            let pos = self.previous().pos;
            let right = self.parse_unary()?;
            Ok(Expr {
                pos,
                kind: ExprKind::Unary {
                    op: UnaryOp::Negate,
                    expr: Box::new(right),
                },
            })
        } else if self.matches(TokenKind::Bang) {
            let pos = self.previous().pos;
            let right = self.parse_unary()?;
            Ok(Expr {
                pos,
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(right),
                },
            })
        } else if self.matches_keyword(Keyword::Await) {
            let pos = self.previous().pos;
            let expr = self.parse_unary()?;
            Ok(Expr {
                pos,
                kind: ExprKind::Await(Box::new(expr)),
            })
        } else if self.matches_keyword(Keyword::New) {
            let pos = self.previous().pos;
            let class = self.parse_type_expr()?;
            self.consume(TokenKind::LParen, "expected `(` after class in `new`")?;
            let args = self.parse_args()?;
            Ok(Expr {
                pos,
                kind: ExprKind::New { class, args },
            })
        } else {
            self.parse_call()
        }
    }

    fn parse_call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let args = self.parse_args()?;
                expr = Expr {
                    pos: expr.pos,
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                let index = self.parse_expression()?;
                self.consume(TokenKind::RBracket, "expected `]` after index")?;
                expr = Expr {
                    pos: expr.pos,
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let field = self.consume_identifier("expected field after `.`")?;
                expr = Expr {
                    pos: expr.pos,
                    kind: ExprKind::Field {
                        target: Box::new(expr),
                        field: field.lexeme.clone(),
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Argument list; the opening `(` is already consumed.
    fn parse_args(&mut self) -> Result<Vec<Expr>, Diagnostic> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        if let Some(token) = self.peek().cloned() {
            match &token.kind {
                TokenKind::Keyword(Keyword::True) => {
                    let tok = self.advance();
                    Ok(literal_expr(Literal::Bool(true), tok.pos))
                }
                TokenKind::Keyword(Keyword::False) => {
                    let tok = self.advance();
                    Ok(literal_expr(Literal::Bool(false), tok.pos))
                }
                TokenKind::Keyword(Keyword::Null) => {
                    let tok = self.advance();
                    Ok(literal_expr(Literal::Null, tok.pos))
                }
                TokenKind::Keyword(Keyword::This) => {
                    let tok = self.advance();
                    Ok(Expr {
                        pos: tok.pos,
                        kind: ExprKind::This,
                    })
                }
                TokenKind::Keyword(Keyword::Lambda) => self.parse_lambda(),
                TokenKind::Number => {
                    let tok = self.advance();
                    let cleaned = tok.lexeme.replace('_', "");
                    let literal = if cleaned.contains('.') {
                        Literal::Float(cleaned.parse().map_err(|_| {
                            Diagnostic::new(DiagnosticKind::Parser, "malformed float literal")
                                .with_pos(tok.pos)
                        })?)
                    } else {
                        Literal::Int(cleaned.parse().map_err(|_| {
                            Diagnostic::new(DiagnosticKind::Parser, "malformed integer literal")
                                .with_pos(tok.pos)
                        })?)
                    };
                    Ok(literal_expr(literal, tok.pos))
                }
                TokenKind::String => {
                    let tok = self.advance();
                    Ok(literal_expr(Literal::Str(tok.lexeme.clone()), tok.pos))
                }
                TokenKind::Identifier => {
                    let tok = self.advance();
                    Ok(Expr {
                        pos: tok.pos,
                        kind: ExprKind::Variable(tok.lexeme.clone()),
                    })
                }
                TokenKind::LParen => {
                    let lparen = self.advance();
                    let inner = self.parse_expression()?;
                    self.consume(TokenKind::RParen, "expected `)` after expression")?;
                    Ok(Expr {
                        pos: lparen.pos,
                        kind: ExprKind::Group(Box::new(inner)),
                    })
                }
                TokenKind::LBracket => {
                    let lbracket = self.advance();
                    let mut elements = Vec::new();
                    if !self.check(TokenKind::RBracket) {
                        loop {
                            elements.push(self.parse_expression()?);
                            if !self.matches(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.consume(TokenKind::RBracket, "expected `]` after list literal")?;
                    Ok(Expr {
                        pos: lbracket.pos,
                        kind: ExprKind::ListLiteral(elements),
                    })
                }
                TokenKind::LBrace => self.parse_inline_map(),
                _ => Err(self.error(&token, "unexpected token in expression")),
            }
        } else {
            Err(self.error_eof("unexpected end of expression"))
        }
    }

    fn parse_inline_map(&mut self) -> Result<Expr, Diagnostic> {
        let lbrace = self.advance();
        let mut entries = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                let key = self.parse_expression()?;
                self.consume(TokenKind::Colon, "expected `:` in map literal")?;
                let value = self.parse_expression()?;
                entries.push((key, value));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBrace, "expected `}` after map literal")?;
        Ok(Expr {
            pos: lbrace.pos,
            kind: ExprKind::MapLiteral(entries),
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, Diagnostic> {
        let fn_token = self.consume_keyword(Keyword::Lambda)?;
        self.consume(TokenKind::LParen, "expected `(` after lambda keyword")?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Expr {
            pos: fn_token.pos,
            kind: ExprKind::Lambda { params, body },
        })
    }

    /// Type annotation with optional generic arguments: a `<` directly after
    /// the type name opens the argument list.
    fn parse_type_expr(&mut self) -> Result<TypeExpr, Diagnostic> {
        let ident = self.consume_identifier("expected type name")?;
        let mut args = Vec::new();
        if self.matches(TokenKind::Less) {
            loop {
                args.push(self.parse_type_expr()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::Greater, "expected `>` to close generic arguments")?;
        }
        Ok(TypeExpr {
            name: ident.lexeme.clone(),
            args,
            pos: ident.pos,
        })
    }

    fn consume_optional_semicolon(&mut self) {
        let _ = self.matches(TokenKind::Semicolon);
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        let found = matches!(
            self.peek(),
            Some(Token {
                kind: TokenKind::Keyword(k),
                ..
            }) if *k == keyword
        );
        if found {
            self.advance();
        }
        found
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .map(|tok| self.error(tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        match self.peek().cloned() {
            Some(token) if token.kind == TokenKind::Keyword(keyword) => Ok(self.advance()),
            Some(token) => Err(self.error(&token, &format!("expected keyword `{keyword:?}`"))),
            None => Err(self.error_eof("unexpected end of input")),
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .map(|tok| self.error(tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().map(|token| token.kind == kind).unwrap_or(false)
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eof) | None)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("`{}`", token.lexeme)
        };
        Diagnostic::new(DiagnosticKind::Parser, format!("{message}, found {found}"))
            .with_pos(token.pos)
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parser, message.to_string())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        pos: left.pos,
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

fn literal_expr(literal: Literal, pos: SourcePos) -> Expr {
    Expr {
        pos,
        kind: ExprKind::Literal(literal),
    }
}
